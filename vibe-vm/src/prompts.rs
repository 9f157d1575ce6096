//! Runtime prompt templates
//!
//! Every text the interpreter sends on its own behalf (as opposed to the
//! prompts written in the vibe file) is phrased here.

/// System instruction for program execution
pub const RUNNER_SYSTEM_PROMPT: &str = "\
You are an expert runner of loosely-defined program-like procedures.
Your job is to execute instructions exactly as requested without being smart or creative.

Key principles:
- Complete the task at hand exactly as specified
- Do not add extra interpretation or creative enhancement
- Follow instructions literally and precisely
- When asked to extract or process data, return exactly what is requested
- Do not elaborate beyond what is explicitly asked for
- Be direct and task-focused in your responses

You excel at following procedural instructions and completing data processing tasks with precision and reliability.";

/// Rewrite a map line so the reply is a JSON array
pub fn require_json_list(line: &str) -> String {
    format!(
        "Please generate a JSON array of the items to process from the following instruction:\n\n{}\n",
        line
    )
}

/// Ask the oracle to pull the list out of its own previous answer
pub fn repair_json_list(query: &str, response: &str) -> String {
    format!(
        "The following query was sent to an LLM:\n\n{}\n\n\
         Please extract the results from its response as a JSON list. Its response was:\n\n{}\n",
        query, response
    )
}

/// First turn of a map branch
pub fn branch_context(element: &serde_json::Value) -> String {
    format!(
        "You're processing only a single branch of the above list. The current value is:\n\n{}",
        render_element(element)
    )
}

/// Summary appended to the parent conversation after every branch finished
pub fn branch_results(results: &[(serde_json::Value, String)]) -> String {
    let mut summary = String::from("Here are the results of the previous instruction:\n");
    for (element, result) in results {
        summary.push_str(&format!("{}: {}\n", render_element(element), result));
    }
    summary
}

/// Preamble for a text file attached to a command
pub fn text_file(filename: &str, contents: &str) -> String {
    format!(
        "The following are the full contents of the file {}:\n\n{}\n",
        filename, contents
    )
}

/// Strings render without quotes, everything else as compact JSON
pub fn render_element(element: &serde_json::Value) -> String {
    match element {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
