//! Compile-time prompt templates

/// System instruction for the classification conversation
pub const COMPILER_SYSTEM_PROMPT: &str = "\
You are an expert compiler and natural language processing specialist. You excel at translating English-language code sketches into precise, executable program structures.

Your task is to compile a domain-specific language (DSL) called \"vibe files\" into an Abstract Syntax Tree (AST). These vibe files contain informal descriptions of data processing workflows that need to be converted into structured programs.

The AST has three main statement types:

1. **Map**: Represents iteration/loops over data (e.g., \"for each item\", \"iterate over\", \"process all\")
   - Contains a dimension command that defines what to iterate over
   - Will be followed by a body program with statements to execute for each item
   - Should ONLY contain lines that pertain to the data being looped over. If a line refers to ALL of the data being looped over, the map has ended. Same if the statement initiates a loop over a different kind of data.
   - A new map can start while inside another map. For example, you might loop over a set of search results, and then loop over all the links on each page in the search results. An inner map will always refer to the dimension of the outer map, otherwise, the two should be separated by an \"EndMap\" (below).

2. **EndMap**: Represents the end of the most recent ongoing \"Map\" statement.
   - Any statement which no longer needs to be carried out *once per element* of the \"Map\" statement should be considered the end of that map. This might include:
     - aggregation/combination operations (e.g., \"combine results\", \"merge into\", \"aggregate\", \"sort by\"),
     - statements which select a subset of the results (e.g. \"pick the best\", \"choose a few of...\")
     - new map statements which don't include a reference to the original statement.

3. **Command**: Represents single actions (e.g., \"extract data\", \"look up\", \"fetch\", \"scrape\")
   - Contains a prompt describing what to do
   - Contains a list of tools needed (like URL fetchers, APIs, etc.) and files to upload.

You are skilled at recognizing these patterns in natural language and converting them into precise AST structures.";

/// Ask for the kind, tools and files of one line
pub fn classification_prompt(line: &str, open_map: Option<&str>) -> String {
    let scope = match open_map {
        Some(dimension) => format!(
            "- \"EndMap\" = the end of the most recent \"Map\". (Combine, merge, an unrelated command, \
             or a new map which is not related to the elements of the first one, etc.)\n  \
             The most recent \"Map\" instruction was: {}\n",
            dimension
        ),
        None => "There is currently no active \"Map\", so \"EndMap\" is not an option.\n".to_string(),
    };

    format!(
        "Analyze this line and classify it, also determining what tools are needed.

Line: {line}

Classification rules:
- \"Command\" = single action (extract, look up, etc.)
- \"Map\" = loops/iteration (for each, iterate over, etc.)
{scope}
Tool options:
- \"url_context\": for accessing web pages, scraping content from URLs
- \"search\": for general web search, finding information
- \"read_file\": for reading the contents of a file on the user's computer and attaching them to the conversation

Return a JSON object with:
- \"type\": the classification
- \"tools\": array of names of any tool needed to execute this line of the program.
- \"files\": array of filenames of any files which should be added to the conversation when executing this line.

A couple of notes about tools:
- If a command inside a Map statement needs to use any tools to access the value that's being mapped over, include the tool for that command too. For example, if we're mapping over a list of web pages, the commands inside the Map might need the \"url_context\" tool to access the page they're analyzing.
- \"files\" is for files whose names are known now, at compile time. \"read_file\" is for files whose names will only be discovered from the conversation at run time.
"
    )
}

/// Corrective re-ask after an `EndMap` with nothing open
pub fn retry_classification_prompt(line: &str) -> String {
    format!(
        "You classified this line as \"EndMap\" but there are no map operations to end:

Line: {line}

An EndMap can only follow a Map. Since there are no active maps, this should be either \
a \"Map\" (for iteration) or a \"Command\" (for a single action).

Please reclassify this line correctly.
"
    )
}
