//! Prompt templates for each model role.
//!
//! Every builder returns a `(system, instruction)` pair.

use crate::types::Section;

pub type Prompt = (String, String);

/// Queries that gather material for planning the report outline.
pub fn planner_queries(topic: &str, report_structure: &str, number_of_queries: usize) -> Prompt {
    let system = format!(
        "You are an expert technical writer helping to plan a report.\n\n\
         <Report topic>\n{topic}\n</Report topic>\n\n\
         <Report structure>\n{report_structure}\n</Report structure>\n\n\
         <Task>\n\
         Generate {number_of_queries} search queries that gather the information needed \
         to structure this report. Each query must stay on the report topic, serve the \
         structure above, and be specific enough to surface high-quality sources while \
         keeping coverage broad.\n\
         </Task>"
    );
    let instruction =
        "Generate search queries that will help with planning the sections of the report."
            .to_string();
    (system, instruction)
}

/// The planning call itself.
pub fn planner_sections(
    topic: &str,
    report_structure: &str,
    context: &str,
    feedback: Option<&str>,
) -> Prompt {
    let feedback = feedback.unwrap_or("None");
    let system = format!(
        "You are an expert report planner. Produce a structured outline for a report.\n\n\
         <Instructions>\n\
         List the report sections. Each section has a number giving its position, a name, \
         a short description of what it covers, a research flag saying whether it needs \
         web research, and empty content.\n\
         Introduction and conclusion sections summarise the rest of the report and never \
         need research.\n\
         </Instructions>\n\n\
         <Topic>\n{topic}\n</Topic>\n\n\
         <Report structure>\nFollow this structure:\n{report_structure}\n</Report structure>\n\n\
         <Context>\nUse this context to guide the section planning:\n{context}\n</Context>\n\n\
         <Feedback>\nIncorporate this reviewer feedback, if any:\n{feedback}\n</Feedback>"
    );
    let instruction = "Generate the sections of the report. Your response must contain a \
                       'sections' list; every entry needs 'section_number', 'name', \
                       'description', 'research' and 'content'."
        .to_string();
    (system, instruction)
}

/// Initial queries for one research section.
pub fn section_queries(section: &Section, number_of_queries: usize) -> Prompt {
    let system = format!(
        "You are an expert technical writer writing web search queries for one section \
         of a technical report.\n\n\
         <Section topic>\n{}\n</Section topic>\n\n\
         <Task>\n\
         Generate {number_of_queries} search queries that collect in-depth information on \
         the section topic. Cover different aspects of the topic and keep every query \
         specific enough to retrieve relevant, high-quality sources.\n\
         </Task>",
        section.description
    );
    let instruction = "Generate search queries on the provided topic.".to_string();
    (system, instruction)
}

/// Draft (or redraft) a research section from the accumulated sources.
pub fn section_writer(section: &Section, context: &str) -> Prompt {
    let existing = if section.has_content() {
        section.content.as_str()
    } else {
        "None"
    };
    let system = format!(
        "You are an expert technical writer writing one section of a technical report.\n\n\
         ## Section title\n{name}\n\n\
         ## Section topic\n{description}\n\n\
         ## Existing content\n{existing}\n\n\
         ## Source material\n{context}\n\n\
         ## Writing instructions\n\
         - Without existing content, write the section from scratch.\n\
         - With existing content, merge it with the new information.\n\n\
         ## Style\n\
         - 150-200 words, excluding title and sources.\n\
         - Open with the key insight in bold.\n\
         - Plain technical language and short paragraphs.\n\
         - Use ## for the section title.\n\
         - At most one structural element: a small Markdown table or a 3-5 item list.\n\
         - Include one concrete example or case study.\n\
         - No preamble.\n\
         - End with the sources used, one per line as `- Title: URL`.",
        name = section.name,
        description = section.description,
    );
    let instruction = "Generate a report section based on the provided sources.".to_string();
    (system, instruction)
}

/// Grade a drafted section and ask for follow-up queries on failure.
pub fn section_grader(section: &Section, number_of_queries: usize) -> Prompt {
    let system = format!(
        "Review a report section against its topic.\n\n\
         <Section topic>\n{}\n</Section topic>\n\n\
         <Section content>\n{}\n</Section content>\n\n\
         <Task>\n\
         Decide whether the section covers the topic with technical accuracy and enough \
         depth. Answer with grade \"pass\" or \"fail\". On \"fail\", provide up to \
         {number_of_queries} follow-up search queries that would gather the missing \
         information.\n\
         </Task>",
        section.description, section.content
    );
    let instruction =
        "Grade the section and consider follow-up queries for missing information.".to_string();
    (system, instruction)
}

/// Write an introduction or conclusion from the finished research sections.
pub fn final_section_writer(section: &Section, context: &str) -> Prompt {
    let system = format!(
        "You are an expert technical writer turning finished research into one report \
         section.\n\n\
         <Section title>\n{name}\n</Section title>\n\n\
         <Section topic>\n{description}\n</Section topic>\n\n\
         <Available report content>\n{context}\n</Available report content>\n\n\
         <Guidelines>\n\
         Introduction: use # for the report title, 50-100 words, state the motivation of \
         the report, no lists, tables or sources.\n\
         Conclusion or summary: use ## for the section title, 100-150 words. Comparative \
         reports include one short Markdown table of key insights; other reports use at \
         most one table or short list. Close with key takeaways or next steps and no \
         sources.\n\
         Prefer precise language and concrete insight over generalities. No preamble and \
         no word counts in the answer.\n\
         </Guidelines>",
        name = section.name,
        description = section.description,
    );
    let instruction = "Generate a report section based on the provided sources.".to_string();
    (system, instruction)
}
