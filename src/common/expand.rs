//! Variable reference substitution
//!
//! Used for operator command lines and for module text templates. Two forms
//! are recognised: bare `$name`, which ends at whitespace, `$`, `\`, `(` or `)`,
//! and delimited `$(name)`, which may be followed directly by any text.
//! `\$` yields a literal `$`; every other backslash sequence passes through
//! untouched so later escape decoding still sees it.

use thiserror::Error;

/// Error produced while substituting variable references
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpandError {
    /// Reference to a name that does not resolve
    #[error("undefined variable '{0}'")]
    Undefined(String),

    /// `$(` without a closing parenthesis
    #[error("unterminated '$(' at offset {0}")]
    Unterminated(usize),

    /// `$()`
    #[error("empty variable reference '$()' at offset {0}")]
    Empty(usize),
}

fn ends_bare_name(c: char) -> bool {
    c.is_whitespace() || matches!(c, '$' | '\\' | '(' | ')')
}

/// Substitute every variable reference in `input`
///
/// # Parameters
///
/// * `input` - Text containing references
/// * `resolve` - Lookup returning the replacement text for a name
///
/// # Returns
///
/// The expanded text, or the first reference that could not be expanded.
/// A `$` that is not followed by a name is kept literally.
pub fn expand_vars<F>(input: &str, mut resolve: F) -> Result<String, ExpandError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, '$')) => out.push('$'),
                Some((_, next)) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            },
            '$' => {
                let name = if matches!(chars.peek(), Some(&(_, '('))) {
                    chars.next();
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, ')')) => break,
                            Some((_, ch)) => name.push(ch),
                            None => return Err(ExpandError::Unterminated(offset)),
                        }
                    }
                    if name.is_empty() {
                        return Err(ExpandError::Empty(offset));
                    }
                    name
                } else {
                    let mut name = String::new();
                    while let Some(&(_, ch)) = chars.peek() {
                        if ends_bare_name(ch) {
                            break;
                        }
                        name.push(ch);
                        chars.next();
                    }
                    if name.is_empty() {
                        out.push('$');
                        continue;
                    }
                    name
                };

                let value = resolve(&name).ok_or(ExpandError::Undefined(name))?;
                out.push_str(&value);
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

/// Check whether text contains anything [`expand_vars`] would substitute
pub fn has_references(input: &str) -> bool {
    expand_vars(input, |_| None).is_err()
}
