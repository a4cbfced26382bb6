//! Prompt templates and the tag grammars they commit the LLM to.
//!
//! The grammars here are a contract with [`crate::ai::parser`]: extraction
//! emits `<entity>`/`<relationship>` fragments, community reports emit
//! `<title>/<summary>/<rating>/<rating_explanation>/<findings>`, and the
//! query map stage emits `<point>` blocks. Parsing is defensive; prompts
//! only raise the odds of well-formed output.

/// Sentinel the gleaning loop watches for to stop early.
pub const GLEANING_DONE_SENTINEL: &str = "NOMORE";

/// Substitute `{name}` placeholders in a template.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

pub const GRAPH_EXTRACTION_PROMPT: &str = r#"== Goal
Given a text document, first identify all necessary entities from the text to capture the information and ideas presented. Next, report all relationships among the identified entities.

== Steps
1. Identify all entities. For each identified entity, extract the following information:
- entity_name: Name of the entity, capitalized
- entity_type: A general label or category for the entity
- entity_description: A comprehensive description of the entity's attributes and activities
Each entity should be XML formatted as follows:

<entity>
    <entity_name>entity_name</entity_name>
    <entity_type>entity_type</entity_type>
    <entity_description>entity_description</entity_description>
</entity>

2. From the entities identified in step 1, identify all pairs of (source_entity, target_entity) that are *clearly related* to each other.
For each pair of related entities, extract the following information:
- source_entity: name of the source entity, as identified in step 1
- target_entity: name of the target entity, as identified in step 1
- relationship_description: explanation as to why you think the source entity and the target entity are related to each other
- relationship_strength: a numeric score indicating strength of the relationship between the source entity and target entity
Each relationship should be XML formatted as follows:

<relationship>
    <source_entity>source_entity</source_entity>
    <target_entity>target_entity</target_entity>
    <relationship_description>relationship_description</relationship_description>
    <relationship_strength>relationship_strength</relationship_strength>
</relationship>

== Example
Text:
TechGlobal's (TG) stock skyrocketed in its opening day on the Global Exchange Thursday. TechGlobal, a formerly public company, was taken private by Vision Holdings in 2014.

Output:
<entity>
    <entity_name>TECHGLOBAL</entity_name>
    <entity_type>ORGANIZATION</entity_type>
    <entity_description>TechGlobal is a stock now listed on the Global Exchange.</entity_description>
</entity>
<entity>
    <entity_name>VISION HOLDINGS</entity_name>
    <entity_type>ORGANIZATION</entity_type>
    <entity_description>Vision Holdings is a firm that previously owned TechGlobal.</entity_description>
</entity>
<relationship>
    <source_entity>TECHGLOBAL</source_entity>
    <target_entity>VISION HOLDINGS</target_entity>
    <relationship_description>Vision Holdings formerly owned TechGlobal from 2014 until present.</relationship_description>
    <relationship_strength>5</relationship_strength>
</relationship>

== Real Data
Text:

{input_text}
"#;

pub const GLEANING_PROMPT: &str = r#"A source text is provided below, along with the entities and relationships extracted from it in XML format. However, some entities or relationships might be missing. Please identify and list the missing ones if any using the same format. Ensure that only entities and relationships explicitly mentioned in the source text are added. Do not create any additional entities or relationships beyond those mentioned in the text. If you are not able to identify any additional ones, just put the single word NOMORE in your reply, do not add any extra punctuation, characters, or explanations.

== Source Text

{input_text}

== Entities and Relationships

{previous_output}

== Important Reminder

If you find any missing entities or relationships, add them using the exact same tags as the provided XML format. Do not create new XML tags beyond those in the provided example.
"#;

pub const ENTITY_FILTER_PROMPT: &str = r#"A source text and a list of entities are provided below. Identify all entities whose <entity_name> appears in the source text. Return only the matching entities in their original XML format.

== Source Text

{input_text}

== Entities

{entities}

== Important Reminder

You must output the entities in their original XML format.
"#;

pub const SUMMARIZE_DESCRIPTIONS_PROMPT: &str = r#"You are a helpful assistant responsible for generating a comprehensive summary of the data provided below.
Given an entity and a list of descriptions related to it, combine all the information into a single, comprehensive description. Include all relevant details from the provided descriptions.
If any descriptions are contradictory, resolve the contradictions to provide a coherent summary.
Don't make anything up in the summary.
Ensure the summary is written in the third person and includes the entity name for full context.
The response should only contain the summary content, without any introductory phrases or notes.

== Data
Entity:
{entity_name}

Description List:
{description_list}
"#;

pub const COMMUNITY_REPORT_PROMPT: &str = r#"You are an AI assistant that helps a human analyst perform general information discovery within a network of entities.

== Goal
Write a comprehensive report of a community, given the entities that belong to the community as well as their relationships. The report will be used to inform decision-makers about information associated with the community and its potential impact.

== Report Structure
The report must contain the following sections, in this exact XML format:

<title>Report title naming the community's key entities; short but specific.</title>
<summary>An executive summary of the community's overall structure, how its entities are related to each other, and significant information associated with its entities.</summary>
<rating>A float score between 0-10 that represents the severity of impact posed by entities within the community.</rating>
<rating_explanation>A single sentence explanation of the impact severity rating.</rating_explanation>
<findings>
    <insight>
        <insight_summary>Short summary of insight 1</insight_summary>
        <insight_explanation>Detailed explanation of insight 1.</insight_explanation>
    </insight>
    <insight>
        <insight_summary>Short summary of insight 2</insight_summary>
        <insight_explanation>Detailed explanation of insight 2.</insight_explanation>
    </insight>
</findings>

Provide 5-10 findings where the input supports them. Do not include information where the supporting evidence for it is not provided.

== Input

{input_text}
"#;

/// More directive variant used when the first report response cannot be
/// parsed. No examples, just the bare grammar, repeated twice.
pub const COMMUNITY_REPORT_FALLBACK_PROMPT: &str = r#"Write a report about the community of entities described in the input below. Your entire response MUST be exactly the following XML structure and nothing else. Every tag is required. <rating> must be a single number between 0 and 10. There must be at least one <insight> block.

<title>...</title>
<summary>...</summary>
<rating>...</rating>
<rating_explanation>...</rating_explanation>
<findings>
    <insight>
        <insight_summary>...</insight_summary>
        <insight_explanation>...</insight_explanation>
    </insight>
</findings>

== Input

{input_text}

== Reminder

Respond with ONLY the XML structure above: <title>, <summary>, <rating>, <rating_explanation>, <findings> containing one or more <insight> blocks. No prose outside the tags.
"#;

pub const TREE_SUMMARY_PROMPT: &str = r#"Summarize the following text in bullet points without any reference to tables or figures. The summary needs to be self-contained. Don't mention that it is a summary. Put a blank line between the bullets.

<text>
{text}
</text>
"#;

pub const TREE_REFINE_PROMPT: &str = r#"Please refine the following text to eliminate any redundant or repetitive descriptions. Ensure the result is concise, clear, and free of unnecessary details while preserving key points. Organize the information in bullet points, with a blank line between each. Present the output in a logical order, prioritizing clarity and brevity. Output only the refined text without any introductory remarks.

<text>
{text}
</text>
"#;

pub const TREE_HEADING_PROMPT: &str = r#"Please provide a concise and descriptive heading that captures the core theme of the following text. Output only the heading text.

<text>
{text}
</text>
"#;

pub const DENOISE_PROMPT: &str = r#"Reorganise the following text in bullet points. Focus on the principles described; remove the dialogue style and anything related to individuals. Do not omit details. No need to provide headings.

== Text

{input_text}
"#;

pub const QUERY_MAP_PROMPT: &str = r#"You are provided with a question and a data table below. Generate a response consisting of a list of key points that respond to the user's question, summarizing all relevant information in the data table.

The data table is a sequence of records in the following XML format:

<record>
<id> ... </id>
<title> ... </title>
<content> ... </content>
</record>

where <id> contains the record ID.

You should use the data provided in the data table below as the primary context for generating the response.

The response should contain a list of points that you have derived from the data records. Each point should be put in <point> </point> tags. Each point should contain four components:

- a title in <title> </title> tags.
- a comprehensive description in <content> </content> tags.
- a list of record id(s) on which the point is based in <ref> </ref> tags. This list should be id(s) only. Avoid explicitly mentioning "record" or record title.
- an importance score which is an integer score between 0-100 that indicates how important the point is in answering the user's question in <score> </score> tags.

The response shall preserve the original meaning and use of modal verbs such as "shall", "may", or "will".

If the data table does not contain sufficient information to provide an answer, just say so. Do not make anything up.

Do not include information where the supporting evidence for it is not provided.

== Question

{query}

== Data Table

{input_text}

== Important Reminder

Your response should answer the question above. Provide reference by stating the record id(s) for each point in your response. The response should be XML format.
"#;

pub const QUERY_REDUCE_PROMPT: &str = r#"You are a helpful assistant responding to questions about a dataset by synthesizing perspectives from multiple analysts.

Generate a response that directly answers the user's question by summarizing and integrating the key points from all the analysts' reports, which focus on different aspects of the dataset.

Note that the analysts' reports provided below are ranked in the **descending order of importance**.

If the provided reports do not contain sufficient information to answer the question, or if you are unsure of the answer, state this clearly without speculating or making assumptions.

The final response should remove all irrelevant information from the analysts' reports and combine the relevant information into a cohesive and comprehensive answer that explains the key points and their implications appropriately.

The response shall preserve the original meaning and use of modal verbs such as "shall", "may" or "will".

Do not include information where the supporting evidence for it is not provided.

== Question

{query}

== Analyst Reports

{report_data}
"#;
