//! Script compiler for the Micro scripting language.
//!
//! The top-level entry points are [`compile`], [`compile_str`], and
//! [`compile_file`]. Compilation never fails on malformed input: unparseable
//! waits fall back to the active default, blank lines and comments are
//! skipped, and unknown lines are dispatched verbatim.

use crate::command::{Command, CompiledScript, MIN_WAIT, Region};
use crate::directives::Directive;
use anyhow::{Context as _, Result};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

static WAIT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<wait\.([^>]*)>").expect("wait tag pattern"));
static WAIT_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)/wait\s+(\S+)").expect("wait command pattern"));

/// Compile script lines into a command timeline.
///
/// With no `region_filter`, every line is compiled except those inside named
/// (`#region :name`) regions. With a filter, only the lines of the region
/// whose name matches it are compiled. A leading `:` on the filter is ignored.
///
/// # Example
///
/// ```
/// use microplay::compile;
///
/// let lines = ["/smile <wait.2>", "#region :Encore", "/bow", "#endregion"];
/// assert_eq!(compile(&lines, None).commands.len(), 1);
/// assert_eq!(compile(&lines, Some(":Encore")).commands[0].text, "/bow");
/// ```
pub fn compile<S: AsRef<str>>(lines: &[S], region_filter: Option<&str>) -> CompiledScript {
    let filter = region_filter
        .map(|f| f.strip_prefix(':').unwrap_or(f))
        .filter(|f| !f.is_empty());

    let mut script = CompiledScript::default();
    let mut current: Option<OpenRegion> = None;
    let mut default_bucket: Option<usize> = None;
    let mut default_wait: Option<Duration> = None;

    for (index, raw) in lines.iter().enumerate() {
        let line_no = index + 1;
        let line = raw.as_ref().trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix("#region ") {
            if let Some(open) = OpenRegion::parse(name) {
                current = Some(open);
                default_bucket = None;
            }
            continue;
        }
        if line == "#region" || line.starts_with("#endregion") {
            current = None;
            default_bucket = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let emit = match (filter, &current) {
            (None, None) => true,
            (None, Some(open)) => !open.is_named,
            (Some(filter), Some(open)) => open.name == filter,
            (Some(_), None) => false,
        };
        if !emit {
            continue;
        }

        let line = strip_inline_comment(line);
        if let Some(arg) = directive_args(line, "/defaultwait") {
            default_wait = parse_seconds(arg);
            continue;
        }

        let (text, wait) = extract_wait(line);
        let wait = wait.or(default_wait).unwrap_or(MIN_WAIT);

        let region = match current.as_mut() {
            Some(open) => match open.index {
                Some(existing) => existing,
                None => {
                    script
                        .regions
                        .push(Region::open(open.name.clone(), open.is_named, line_no));
                    open.index = Some(script.regions.len() - 1);
                    script.regions.len() - 1
                }
            },
            None => match default_bucket {
                Some(existing) => existing,
                None => {
                    script.regions.push(Region::open("", false, line_no));
                    default_bucket = Some(script.regions.len() - 1);
                    script.regions.len() - 1
                }
            },
        };

        let command = Command {
            directive: Directive::classify(&text),
            text,
            line: line_no,
            region,
            wait,
        };
        script.regions[region].absorb(&command);
        script.commands.push(command);
    }

    debug!(
        target: "compiler",
        "Compiled {} commands in {} regions (filter: {:?})",
        script.commands.len(),
        script.regions.len(),
        filter
    );
    script
}

/// Compile a script held in a string slice.
pub fn compile_str(content: &str, region_filter: Option<&str>) -> CompiledScript {
    let lines: Vec<&str> = content.lines().collect();
    compile(&lines, region_filter)
}

/// Read a script file and compile it.
///
/// # Errors
///
/// Returns an error only if the file cannot be read.
pub fn compile_file(path: impl AsRef<Path>, region_filter: Option<&str>) -> Result<CompiledScript> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script file: {}", path.display()))?;
    Ok(compile_str(&content, region_filter))
}

/// A `#region` block currently open during compilation.
struct OpenRegion {
    name: String,
    is_named: bool,
    /// Position in the output once the region has emitted a command.
    index: Option<usize>,
}

impl OpenRegion {
    /// Parse the text after `#region `. A `:` with no name is ignored.
    fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        let (name, is_named) = match name.strip_prefix(':') {
            Some(stripped) => (stripped.trim(), true),
            None => (name, false),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            is_named,
            index: None,
        })
    }
}

/// If `line` is exactly `keyword` or `keyword` followed by whitespace, return
/// the trimmed remainder.
fn directive_args<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Pull the wait out of a line.
///
/// `<wait.N>` tokens take precedence over `/wait N` tokens; within a kind the
/// last occurrence wins. All wait tokens are removed from the returned text.
/// A token whose number does not parse yields no wait.
fn extract_wait(line: &str) -> (String, Option<Duration>) {
    let wait = match WAIT_TAG.captures_iter(line).last() {
        Some(tag) => Some(parse_seconds(&tag[1])),
        None => WAIT_COMMAND
            .captures_iter(line)
            .last()
            .map(|cmd| parse_seconds(&cmd[1])),
    };
    let text = WAIT_TAG.replace_all(line, "");
    let text = WAIT_COMMAND.replace_all(&text, "");
    (text.trim().to_string(), wait.flatten())
}

/// Parse a non-negative number of seconds, e.g. `2` or `2.5`.
pub(crate) fn parse_seconds(s: &str) -> Option<Duration> {
    let secs: f64 = s.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Strip inline comments from a line, preserving `#` inside quoted strings.
fn strip_inline_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if ch == '#' && !in_quotes {
            return line[..i].trim();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_plain_lines_get_floor_wait() {
        let script = compile_str("/smile\n/wave\n\n/bow\n", None);
        assert_eq!(script.len(), 3);
        assert!(script.commands.iter().all(|c| c.wait == MIN_WAIT));
        assert_eq!(script.commands[2].line, 4);
        assert_eq!(script.regions.len(), 1);
        assert!(script.regions[0].is_default);
    }

    #[test]
    fn test_wait_tag_stripped() {
        let script = compile_str("/ac fire <wait.2.5>", None);
        assert_eq!(script.commands[0].text, "/ac fire");
        assert_eq!(script.commands[0].wait, secs(2.5));
    }

    #[test]
    fn test_wait_command_stripped() {
        let script = compile_str("/dance /wait 3", None);
        assert_eq!(script.commands[0].text, "/dance");
        assert_eq!(script.commands[0].wait, secs(3.0));
    }

    #[test]
    fn test_wait_tag_preferred_and_last_wins() {
        let (text, wait) = extract_wait("/a <wait.1> /wait 9 <wait.4>");
        assert_eq!(wait, Some(secs(4.0)));
        assert_eq!(text, "/a");
        let (_, wait) = extract_wait("/a /wait 1 /wait 2");
        assert_eq!(wait, Some(secs(2.0)));
    }

    #[test]
    fn test_malformed_wait_falls_back() {
        let script = compile_str("/defaultwait 1\n/a <wait.x>\n/defaultwait\n/b <wait.->\n", None);
        assert_eq!(script.commands[0].text, "/a");
        assert_eq!(script.commands[0].wait, secs(1.0));
        assert_eq!(script.commands[1].wait, MIN_WAIT);
    }

    #[test]
    fn test_defaultwait_set_and_cleared() {
        let script = compile_str("/defaultwait 1\n/a\n/b\n/c\n/defaultwait\n/d\n", None);
        assert_eq!(script.len(), 4);
        for cmd in &script.commands[..3] {
            assert_eq!(cmd.wait, secs(1.0));
        }
        assert_eq!(script.commands[3].wait, MIN_WAIT);
    }

    #[test]
    fn test_defaultwait_needs_word_boundary() {
        let script = compile_str("/defaultwaiting 5\n", None);
        assert_eq!(script.commands[0].text, "/defaultwaiting 5");
    }

    #[test]
    fn test_named_region_only_with_filter() {
        let text = "/intro\n#region :Hidden\n/secret <wait.2>\n#endregion\n/outro\n";
        let default = compile_str(text, None);
        assert_eq!(
            default.commands.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
            ["/intro", "/outro"]
        );
        assert!(default.regions.iter().all(|r| !r.is_named));

        let hidden = compile_str(text, Some("Hidden"));
        assert_eq!(hidden.len(), 1);
        assert_eq!(hidden.commands[0].text, "/secret");
        assert!(hidden.regions[0].is_named);
        assert_eq!(hidden.regions[0].name, "Hidden");

        assert_eq!(compile_str(text, Some(":Hidden")).len(), 1);
    }

    #[test]
    fn test_filter_selects_plain_region() {
        let text = "/a\n#region Verse\n/b\n/c\n#endregion\n/d\n";
        let verse = compile_str(text, Some("Verse"));
        assert_eq!(verse.len(), 2);
        assert_eq!(compile_str(text, Some("verse")).len(), 0);
    }

    #[test]
    fn test_region_bounds_and_wait() {
        let text = "#region Verse\n# note\n/a <wait.2>\n\n/b <wait.3>\n#endregion\n";
        let script = compile_str(text, None);
        let region = &script.regions[0];
        assert_eq!(region.name, "Verse");
        assert_eq!((region.start_line, region.end_line), (3, 5));
        assert_eq!(region.wait, secs(5.0));
        assert!(script.commands.iter().all(|c| c.region == 0));
    }

    #[test]
    fn test_default_buckets_split_by_regions() {
        let script = compile_str("/a\n#region R\n/b\n#endregion\n/c\n", None);
        assert_eq!(script.regions.len(), 3);
        assert!(script.regions[0].is_default);
        assert_eq!(script.regions[1].name, "R");
        assert!(script.regions[2].is_default);
        assert_eq!(script.commands[2].region, 2);
    }

    #[test]
    fn test_empty_named_region_ignored() {
        let script = compile_str("#region Verse\n#region :\n/a\n", None);
        assert_eq!(script.regions.len(), 1);
        assert_eq!(script.regions[0].name, "Verse");
    }

    #[test]
    fn test_bare_region_closes() {
        let script = compile_str("#region :Hidden\n/a\n#region\n/b\n", None);
        assert_eq!(script.len(), 1);
        assert_eq!(script.commands[0].text, "/b");
    }

    #[test]
    fn test_inline_comment_truncated() {
        let script = compile_str("/ac \"Fire #1\" <wait.1> # opener\n", None);
        assert_eq!(script.commands[0].text, "/ac \"Fire #1\"");
        assert_eq!(script.commands[0].wait, secs(1.0));
    }

    #[test]
    fn test_wait_only_line_holds() {
        let script = compile_str("<wait.3>\n", None);
        assert_eq!(script.commands[0].text, "");
        assert_eq!(script.commands[0].directive, Directive::Hold);
        assert_eq!(script.commands[0].wait, secs(3.0));
    }

    #[test]
    fn test_directives_classified() {
        let script = compile_str("/loop\n/autocd start <wait.1>\n", None);
        assert_eq!(script.commands[0].directive, Directive::Loop);
        assert!(matches!(
            script.commands[1].directive,
            Directive::AutoCountdown(crate::directives::CountdownMode::Start)
        ));
    }

    #[test]
    fn test_source_line_round_trip() {
        let original = compile_str("/ac fire <wait.2.5>\n/emote /wait 1\n/dance\n", None);
        for command in &original.commands {
            let again = compile_str(&command.to_source_line(), None);
            assert_eq!(again.commands[0].text, command.text);
            assert_eq!(again.commands[0].wait, command.wait);
        }
    }

    #[test]
    fn test_huge_waits_saturate() {
        let script = compile_str("/a <wait.1e19>\n/b <wait.1e19>\n", None);
        assert_eq!(script.len(), 2);
        assert_eq!(script.regions[0].wait, Duration::MAX);
        assert_eq!(script.total_wait(), Duration::MAX);
    }

    #[test]
    fn test_compile_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dance.txt");
        std::fs::write(&path, "/a\n/b <wait.1>\n").unwrap();
        assert_eq!(compile_file(&path, None).unwrap().len(), 2);
        assert!(compile_file(dir.path().join("missing.txt"), None).is_err());
    }

    #[test]
    fn test_strip_inline_comments() {
        assert_eq!(strip_inline_comment("/wave # comment"), "/wave");
        assert_eq!(strip_inline_comment("/ac \"#hashtag\""), "/ac \"#hashtag\"");
    }
}
