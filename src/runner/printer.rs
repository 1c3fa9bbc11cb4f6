use colored::{Color, Colorize};

use crate::script::{ConsoleLevel, ScriptResult};

use super::{
    report::RunReport,
    session::{RequestResult, RequestStatus},
};

fn status_color(status: RequestStatus) -> Color {
    match status {
        RequestStatus::Passed => Color::Green,
        RequestStatus::Failed => Color::Red,
        RequestStatus::Error => Color::Magenta,
        RequestStatus::Skipped => Color::Yellow,
        RequestStatus::Pending | RequestStatus::Running => Color::White,
    }
}

/// One block per request: status line, console output, assertions, errors.
pub fn format_request_result(result: &RequestResult) -> String {
    let mut out = String::new();
    let status = result.status.as_str().to_uppercase();
    out.push_str(&format!(
        "{} {} {} {}\n",
        format!("[{status}]").color(status_color(result.status)).bold(),
        result.request_info.method.bold(),
        result.request_info.url.cyan(),
        format!("({:.1} ms)", result.duration_ms).dimmed()
    ));
    if let Some(response) = &result.response {
        out.push_str(&format!(
            "  {} {} {}\n",
            "Status:".bold(),
            response.status,
            response.status_text.dimmed()
        ));
    }

    for (label, script) in [
        ("pre-request", &result.pre_script_result),
        ("post-response", &result.post_script_result),
    ] {
        if let Some(script) = script {
            push_script(&mut out, label, script);
        }
    }

    if let Some(error) = &result.error {
        out.push_str(&format!("  {} {}\n", "Error:".red().bold(), error));
    }
    out
}

fn push_script(out: &mut String, label: &str, script: &ScriptResult) {
    for entry in &script.console_output {
        let level = match entry.level {
            ConsoleLevel::Error => entry.level.as_str().red(),
            ConsoleLevel::Warn => entry.level.as_str().yellow(),
            _ => entry.level.as_str().dimmed(),
        };
        out.push_str(&format!("  {} [{}] {}\n", label.dimmed(), level, entry.message));
    }
    for assertion in &script.assertions {
        if assertion.passed {
            out.push_str(&format!("  {} {}\n", "✓".green(), assertion.name));
        } else {
            out.push_str(&format!(
                "  {} {} {}\n",
                "✗".red(),
                assertion.name,
                assertion.message.dimmed()
            ));
        }
    }
}

pub fn format_summary(report: &RunReport) -> String {
    let summary = &report.summary;
    let headline = if summary.all_passed() {
        "Run passed".green().bold()
    } else {
        "Run failed".red().bold()
    };
    format!(
        "{} {}\n  {} {}/{} requests, {} passed, {} failed, {} errors, {} skipped\n  {} {} passed, {} failed\n  {} {:.1} ms\n",
        headline,
        format!("({})", report.session_info.status).dimmed(),
        "Requests:".bold(),
        summary.completed_requests,
        summary.total_requests,
        summary.passed.to_string().green(),
        summary.failed.to_string().red(),
        summary.errors.to_string().magenta(),
        summary.skipped.to_string().yellow(),
        "Assertions:".bold(),
        summary.passed_assertions.to_string().green(),
        summary.failed_assertions.to_string().red(),
        "Duration:".bold(),
        summary.total_duration_ms
    )
}

pub fn print_request_result(result: &RequestResult) {
    print!("{}", format_request_result(result));
}

pub fn print_summary(report: &RunReport) {
    print!("{}", format_summary(report));
}
