use crate::cli::ReportArgs;
use crate::error::CliError;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets, Attribute, Cell, Color, Table};
use htcflow_client::{ReportAssembler, ReportOutput, RunReport, Scheduler};
use htcflow_core::model::{StateCounts, WorkflowState};
use std::collections::BTreeMap;

const SUMMARY_HEADER: [&str; 9] = [
    "X", "STATE", "%S", "ID", "OPERATOR", "PROJECT", "CAMPAIGN", "PAYLOAD", "RUN",
];

pub fn handle_report(args: ReportArgs, scheduler: &dyn Scheduler) -> Result<(), CliError> {
    let mut assembler = ReportAssembler::new(scheduler);
    if args.global {
        assembler = assembler.with_scope(scheduler.locate_schedds(true)?);
    }
    if let Some(days) = args.hist {
        assembler = assembler.with_history(days);
    }
    let output = assembler.report(
        args.id.as_deref(),
        args.user.as_deref(),
        args.pass_thru.as_deref(),
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }
    print_report(&output, args.id.is_some());
    Ok(())
}

fn print_report(output: &ReportOutput, detailed: bool) {
    if detailed {
        for report in output.reports.values() {
            print_detailed(report);
        }
    } else if !output.reports.is_empty() {
        println!("{}", summary_table(output.reports.values()));
    }
    if !output.message.is_empty() {
        println!("{}", output.message.yellow());
    }
}

fn print_detailed(report: &RunReport) {
    println!("{}", summary_table(std::iter::once(report)));
    println!("Path: {}", report.path);
    println!("Global job id: {}", report.global_wms_id);
    println!("{}", label_table(report));

    let failed: Vec<(&String, &Vec<i64>)> = report
        .exit_code_summary
        .iter()
        .filter(|(_, codes)| !codes.is_empty())
        .collect();
    if !failed.is_empty() {
        println!("{}", "Exit codes of failed jobs:".bold());
        let mut table = new_table(&["LABEL", "EXIT CODES"]);
        for (label, codes) in failed {
            let codes: Vec<String> = codes.iter().map(i64::to_string).collect();
            table.add_row(vec![
                Cell::new(label).fg(Color::Yellow),
                Cell::new(codes.join(", ")).fg(Color::Red),
            ]);
        }
        println!("{}", table);
    }

    for note in &report.notes {
        println!("{}", note);
    }
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            header
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    table
}

fn state_color(state: WorkflowState) -> Color {
    match state {
        WorkflowState::Succeeded => Color::Green,
        WorkflowState::Failed => Color::Red,
        WorkflowState::Held => Color::Yellow,
        WorkflowState::Running => Color::Cyan,
        WorkflowState::Pruned | WorkflowState::Deleted => Color::DarkGrey,
        _ => Color::Reset,
    }
}

/// `F` for runs with failed jobs, `H` for runs with held jobs.
fn attention_flag(counts: &StateCounts) -> &'static str {
    let count = |state| counts.get(&state).copied().unwrap_or(0);
    if count(WorkflowState::Failed) > 0 {
        "F"
    } else if count(WorkflowState::Held) > 0 {
        "H"
    } else {
        ""
    }
}

fn percent_succeeded(report: &RunReport) -> i64 {
    if report.total_number_jobs <= 0 {
        return 0;
    }
    let succeeded = report
        .job_state_counts
        .get(&WorkflowState::Succeeded)
        .copied()
        .unwrap_or(0);
    succeeded * 100 / report.total_number_jobs
}

fn summary_table<'a>(reports: impl IntoIterator<Item = &'a RunReport>) -> Table {
    let mut table = new_table(&SUMMARY_HEADER);
    for report in reports {
        table.add_row(vec![
            Cell::new(attention_flag(&report.job_state_counts)).fg(Color::Red),
            Cell::new(report.state).fg(state_color(report.state)),
            Cell::new(percent_succeeded(report)),
            Cell::new(&report.wms_id).fg(Color::Yellow),
            Cell::new(&report.operator),
            Cell::new(&report.project),
            Cell::new(&report.campaign),
            Cell::new(&report.payload),
            Cell::new(&report.run),
        ]);
    }
    table
}

/// Labels with their expected job counts, in the order of the run summary
/// (`label1:2;label2:4`).
fn parse_run_summary(summary: &str) -> Vec<(String, i64)> {
    summary
        .split(';')
        .filter_map(|part| {
            let (label, count) = part.split_once(':')?;
            Some((label.trim().to_string(), count.trim().parse().unwrap_or(0)))
        })
        .filter(|(label, _)| !label.is_empty())
        .collect()
}

fn label_table(report: &RunReport) -> Table {
    let states: Vec<WorkflowState> = WorkflowState::ALL
        .into_iter()
        .filter(|s| report.job_state_counts.get(s).copied().unwrap_or(0) > 0)
        .collect();

    let mut per_label: BTreeMap<&str, StateCounts> = BTreeMap::new();
    for job in &report.jobs {
        *per_label
            .entry(job.label.as_str())
            .or_default()
            .entry(job.state)
            .or_insert(0) += 1;
    }

    let mut labels = parse_run_summary(&report.run_summary);
    for label in per_label.keys() {
        if !labels.iter().any(|(l, _)| l == label) {
            labels.push((label.to_string(), 0));
        }
    }

    let mut header = vec!["LABEL".to_string(), "EXPECTED".to_string()];
    header.extend(states.iter().map(|s| s.name().to_string()));
    let header: Vec<&str> = header.iter().map(String::as_str).collect();
    let mut table = new_table(&header);

    let state_cells = |counts: Option<&StateCounts>| -> Vec<Cell> {
        states
            .iter()
            .map(|state| {
                let n = counts.and_then(|c| c.get(state)).copied().unwrap_or(0);
                let cell = Cell::new(n);
                if n > 0 {
                    cell.fg(state_color(*state))
                } else {
                    cell
                }
            })
            .collect()
    };

    for (label, expected) in &labels {
        let mut row = vec![Cell::new(label).fg(Color::Yellow), Cell::new(expected)];
        row.extend(state_cells(per_label.get(label.as_str())));
        table.add_row(row);
    }
    let mut total = vec![
        Cell::new("TOTAL").add_attribute(Attribute::Bold),
        Cell::new(report.total_number_jobs),
    ];
    total.extend(state_cells(Some(&report.job_state_counts)));
    table.add_row(total);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use htcflow_client::JobReport;

    fn job(name: &str, label: &str, state: WorkflowState) -> JobReport {
        JobReport {
            wms_id: format!("1.{}", name.len()),
            name: name.to_string(),
            label: label.to_string(),
            state,
        }
    }

    fn report() -> RunReport {
        let jobs = vec![
            job("init", "pipetaskInit", WorkflowState::Succeeded),
            job("a1", "label1", WorkflowState::Succeeded),
            job("a2", "label1", WorkflowState::Failed),
            job("final", "finalJob", WorkflowState::Unready),
        ];
        let mut counts = StateCounts::new();
        for state in WorkflowState::ALL {
            counts.insert(state, 0);
        }
        counts.insert(WorkflowState::Succeeded, 2);
        counts.insert(WorkflowState::Failed, 1);
        counts.insert(WorkflowState::Unready, 1);
        RunReport {
            wms_id: "1163.0".into(),
            global_wms_id: "sched1#1163.0#1722040509".into(),
            path: "/submit/u_run".into(),
            label: String::new(),
            run: "u_run".into(),
            project: "dev".into(),
            campaign: "quick".into(),
            payload: "tests".into(),
            operator: "jdoe".into(),
            run_summary: "pipetaskInit:1;label1:2;finalJob:1".into(),
            state: WorkflowState::Failed,
            jobs,
            total_number_jobs: 4,
            job_state_counts: counts,
            exit_code_summary: BTreeMap::from([("label1".to_string(), vec![2])]),
            notes: Vec::new(),
        }
    }

    #[test]
    fn test_parse_run_summary_keeps_order() {
        assert_eq!(
            parse_run_summary("pipetaskInit:1;label1:2;finalJob:1"),
            vec![
                ("pipetaskInit".to_string(), 1),
                ("label1".to_string(), 2),
                ("finalJob".to_string(), 1)
            ]
        );
        assert!(parse_run_summary("").is_empty());
    }

    #[test]
    fn test_attention_flag() {
        let mut counts = StateCounts::new();
        assert_eq!(attention_flag(&counts), "");
        counts.insert(WorkflowState::Held, 1);
        assert_eq!(attention_flag(&counts), "H");
        counts.insert(WorkflowState::Failed, 1);
        assert_eq!(attention_flag(&counts), "F");
    }

    #[test]
    fn test_percent_succeeded() {
        let mut report = report();
        assert_eq!(percent_succeeded(&report), 50);
        report.total_number_jobs = 0;
        assert_eq!(percent_succeeded(&report), 0);
    }

    #[test]
    fn test_label_table_shows_only_present_states() {
        let text = label_table(&report()).to_string();
        assert!(text.contains("SUCCEEDED"));
        assert!(text.contains("FAILED"));
        assert!(text.contains("UNREADY"));
        assert!(!text.contains("RUNNING"));
        assert!(text.contains("label1"));
        assert!(text.contains("TOTAL"));
    }

    #[test]
    fn test_summary_table_row() {
        let text = summary_table(std::iter::once(&report())).to_string();
        assert!(text.contains("1163.0"));
        assert!(text.contains("jdoe"));
        assert!(text.contains("50"));
    }
}
