//! `undercity import-plan <file>` — parse a markdown plan file into Tasks.
//!
//! The parser is intentionally opaque to the core (spec.md §6): it reads
//! `## Section` headers and `- `/`N. ` list items, producing one objective
//! per list item with its section name and an optional `(priority: N)`
//! annotation.

use std::path::{Path, PathBuf};

use clap::Args as ClapArgs;

use super::ExitCode;

#[derive(ClapArgs)]
pub struct Args {
    /// Markdown plan file to parse.
    pub file: PathBuf,

    /// Print the parsed Tasks without adding them to the Task Board.
    #[arg(long)]
    pub dry_run: bool,

    /// Assign ascending priority in the order items appear, overriding any
    /// inline `(priority: N)` annotations.
    #[arg(long)]
    pub by_priority: bool,
}

struct PlanItem {
    objective: String,
    section: Option<String>,
    priority: Option<f64>,
}

fn parse_inline_priority(line: &str) -> (String, Option<f64>) {
    if let Some(open) = line.rfind("(priority:") {
        if let Some(close_rel) = line[open..].find(')') {
            let close = open + close_rel;
            let value = line[open + "(priority:".len()..close].trim();
            if let Ok(p) = value.parse::<f64>() {
                let text = format!("{}{}", &line[..open], &line[close + 1..]);
                return (text.trim().to_owned(), Some(p));
            }
        }
    }
    (line.trim().to_owned(), None)
}

fn parse_plan(contents: &str) -> Vec<PlanItem> {
    let mut items = Vec::new();
    let mut section: Option<String> = None;

    for raw_line in contents.lines() {
        let line = raw_line.trim_end();
        if let Some(heading) = line.strip_prefix("## ") {
            section = Some(heading.trim().to_owned());
            continue;
        }
        let trimmed = line.trim_start();
        let item_text = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .or_else(|| {
                let digits_end = trimmed.find(|c: char| !c.is_ascii_digit())?;
                if digits_end > 0 && trimmed[digits_end..].starts_with(". ") {
                    Some(&trimmed[digits_end + 2..])
                } else {
                    None
                }
            });
        if let Some(text) = item_text {
            if text.trim().is_empty() {
                continue;
            }
            let (objective, priority) = parse_inline_priority(text);
            items.push(PlanItem {
                objective,
                section: section.clone(),
                priority,
            });
        }
    }
    items
}

pub fn run(repo: &Path, args: Args) -> anyhow::Result<ExitCode> {
    let contents = std::fs::read_to_string(&args.file)?;
    let mut items = parse_plan(&contents);

    if args.by_priority {
        for (i, item) in items.iter_mut().enumerate() {
            item.priority = Some(100.0 + i as f64);
        }
    }

    if args.dry_run {
        for item in &items {
            println!(
                "[{}] {}{}",
                item.section.as_deref().unwrap_or("-"),
                item.objective,
                item.priority.map(|p| format!(" (priority: {p})")).unwrap_or_default()
            );
        }
        return Ok(ExitCode::Success);
    }

    let config = super::load_config(repo)?;
    let board = super::open_board(repo, &config)?;
    for item in items {
        board.add_task(item.objective, item.priority, None)?;
    }

    Ok(ExitCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_list() {
        let items = parse_plan("- fix typo\n- add tests\n");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].objective, "fix typo");
        assert_eq!(items[0].section, None);
    }

    #[test]
    fn parses_sections_and_priority_annotations() {
        let items = parse_plan("## Bugs\n- fix crash (priority: 5)\n1. another bug\n");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].section.as_deref(), Some("Bugs"));
        assert_eq!(items[0].objective, "fix crash");
        assert_eq!(items[0].priority, Some(5.0));
        assert_eq!(items[1].objective, "another bug");
    }

    #[test]
    fn ignores_prose_lines() {
        let items = parse_plan("Some prose here.\n- a real item\nMore prose.\n");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].objective, "a real item");
    }
}
