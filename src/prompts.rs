//! Prompts for structured table extraction.
//!
//! Callers can override the system prompt via
//! [`crate::config::PipelineConfig::system_prompt`]; the user prompts below
//! are always built here.

/// Default system prompt: the shape of a [`crate::table::StructuredTableRecord`].
///
/// This prompt is used when `PipelineConfig::system_prompt` is `None`.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert at reading financial tables from regulatory filings. You turn one table into one JSON object.

Return a single JSON object with exactly these keys:

{
  "name": "name of the table (must be underscores and NO spaces)",
  "summary": "short, concise summary/caption of the table",
  "columns": ["list", "of", "column", "names"],
  "data": [{"column name": "value", "...": "..."}]
}

Rules:

1. COLUMNS
   - Column names may be spread across several header rows. Merge them into
     one meaningful name per column (e.g. "Year Ended" over "Jan 28, 2024"
     becomes "year_ended_jan_28_2024").
   - Every column name is unique.

2. DATA
   - One object per table row, keyed by the names in "columns".
   - Numbers are JSON numbers: drop currency symbols and thousands
     separators, write (1,234) as -1234.
   - Empty cells and dashes are null.
   - Do not invent rows or values that are not in the table.

3. OUTPUT FORMAT
   - Output ONLY the JSON object
   - Do NOT wrap it in ```json fences
   - Do NOT add commentary or explanations"#;

/// User prompt accompanying a table image.
///
/// `caption` is the text that precedes the table in the filing; it often
/// names the table or its units.
pub fn image_prompt(caption: Option<&str>) -> String {
    let sibling = match caption.map(str::trim) {
        Some(c) if !c.is_empty() => format!(" and here is sibling content: {c}"),
        _ => String::new(),
    };
    format!(
        "Please review the image carefully which has a table{sibling}.\n\
There might be column names that are spread across multiple rows in the table; \
standardize the multi-level column names by renaming them in a meaningful way.\n\
Return the table data in JSON format."
    )
}

/// User prompt for repairing a table from its text rendering.
pub fn text_prompt(table_text: &str) -> String {
    format!(
        "Please review the following data which has a table rendered as aligned text.\n\n\
Table string:\n\
\"\"\"\n{table_text}\"\"\"\n\n\
Fix the table structure and the misalignment of columns where some columns were \
split into two while parsing the data. There might be column names that are spread \
across multiple rows in the table.\n\
Do NOT include any extra information.\n\
Always return the response in JSON format."
    )
}
