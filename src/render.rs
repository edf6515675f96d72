use std::fmt::Write;

use percent_encoding::{AsciiSet, CONTROLS, PercentEncode, utf8_percent_encode};

use crate::model::Release;

/// Characters that would end a Markdown link target early
const LINK_TARGET: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'(').add(b')').add(b'<').add(b'>');

/// Renders the releases of a project as a Markdown changelog
pub fn render_markdown(project: &str, releases: &[Release]) -> String {
    let mut out = String::new();
    // Writing to a String never fails
    let _ = render_into(&mut out, project, releases);
    out
}

fn render_into(out: &mut String, project: &str, releases: &[Release]) -> std::fmt::Result {
    writeln!(out, "# Changelog of {}", escape(project))?;

    if releases.is_empty() {
        writeln!(out, "\nNo releases found.")?;
        return Ok(());
    }

    for release in releases {
        writeln!(
            out,
            "\n## [{}]({}) ({})",
            escape(&release.name),
            link(&release.url),
            release.formatted_date
        )?;

        if release.is_empty() {
            writeln!(out, "\nNo changes.")?;
            continue;
        }

        if !release.issues.is_empty() {
            writeln!(out, "\n**Closed issues:**\n")?;
            for issue in &release.issues {
                writeln!(out, "- {} [#{}]({})", escape(&issue.name), issue.id, link(&issue.url))?;
            }
        }

        if !release.merge_requests.is_empty() {
            writeln!(out, "\n**Merged pull requests:**\n")?;
            for mr in &release.merge_requests {
                writeln!(
                    out,
                    "- {} [#{}]({}) ([@{}]({}))",
                    escape(&mr.name),
                    mr.id,
                    link(&mr.url),
                    escape(&mr.author),
                    link(&mr.author_url)
                )?;
            }
        }
    }

    Ok(())
}

fn link(url: &str) -> PercentEncode<'_> {
    utf8_percent_encode(url.trim(), LINK_TARGET)
}

/// Escapes the characters that would break the Markdown inline structure
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.trim().chars() {
        match c {
            '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '>' | '#' | '|' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' | '\r' => escaped.push(' '),
            c => escaped.push(c),
        }
    }
    escaped
}
