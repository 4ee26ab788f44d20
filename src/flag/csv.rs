//! Single-record comma-separated encoding used by list and map flags.
//!
//! Fields containing a comma, a double quote, a line break or leading
//! whitespace are wrapped in double quotes; embedded quotes are doubled.

/// Split one record into its fields. An empty input yields no fields.
///
/// Parsing stops at the first line break outside quotes.
pub(crate) fn read_record(input: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    if input.is_empty() {
        return Ok(fields);
    }

    let mut chars = input.chars().peekable();
    let mut field = String::new();
    let mut column = 0usize;

    loop {
        // start of a field
        if chars.peek() == Some(&'"') {
            chars.next();
            column += 1;
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        column += 2;
                        field.push('"');
                    }
                    Some('"') => {
                        column += 1;
                        break;
                    }
                    Some(c) => {
                        column += 1;
                        field.push(c);
                    }
                    None => return Err(format!("extraneous or missing \" in quoted field at column {column}")),
                }
            }
            match chars.next() {
                Some(',') => {
                    column += 1;
                    fields.push(std::mem::take(&mut field));
                    continue;
                }
                None | Some('\n') => {
                    fields.push(field);
                    return Ok(fields);
                }
                Some('\r') if matches!(chars.peek(), None | Some('\n')) => {
                    fields.push(field);
                    return Ok(fields);
                }
                Some(_) => return Err(format!("extraneous \" in field at column {column}")),
            }
        }

        loop {
            match chars.next() {
                Some(',') => {
                    column += 1;
                    fields.push(std::mem::take(&mut field));
                    break;
                }
                Some('"') => return Err(format!("bare \" in non-quoted field at column {column}")),
                Some('\n') | None => {
                    if field.ends_with('\r') {
                        field.pop();
                    }
                    fields.push(field);
                    return Ok(fields);
                }
                Some(c) => {
                    column += 1;
                    field.push(c);
                }
            }
        }
    }
}

/// Join fields into one record, quoting where needed.
pub(crate) fn write_record<S: AsRef<str>>(fields: &[S]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let field = field.as_ref();
        if needs_quotes(field) {
            out.push('"');
            for c in field.chars() {
                if c == '"' {
                    out.push('"');
                }
                out.push(c);
            }
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out
}

fn needs_quotes(field: &str) -> bool {
    if field.is_empty() {
        return false;
    }
    if field.starts_with(' ') || field.starts_with('\t') {
        return true;
    }
    field.contains([',', '"', '\r', '\n'])
}
