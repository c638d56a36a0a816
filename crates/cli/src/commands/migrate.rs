use pgupgrade_migrate::{Migrator, PendingScript, StatusReport};
use tracing::info;

pub async fn run(migrator: &Migrator) -> anyhow::Result<()> {
    let summary = migrator.run().await?;

    if summary.applied.is_empty() {
        info!("Nothing to apply, database is at version {}", summary.final_version);
    } else {
        info!(
            "Applied {} script(s) in {}ms, database is at version {}",
            summary.applied_count(),
            summary.execution_time_ms,
            summary.final_version
        );
    }

    Ok(())
}

pub async fn pending(migrator: &Migrator) -> anyhow::Result<()> {
    let pending = migrator.pending().await?;
    print!("{}", render_pending(&pending));
    Ok(())
}

pub async fn status(migrator: &Migrator, json: bool) -> anyhow::Result<()> {
    let report = migrator.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_status(&report));
    }

    Ok(())
}

fn render_pending(pending: &[PendingScript]) -> String {
    if pending.is_empty() {
        return "No pending upgrade scripts\n".to_string();
    }

    let mut out = format!("{} pending upgrade script(s):\n", pending.len());
    for script in pending {
        out.push_str(&format!("  {:>6}  {}\n", script.version, script.name));
    }
    out
}

fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Database is at version {}\n", report.current_version));
    out.push_str("================\n");

    if report.applied.is_empty() {
        out.push_str("No upgrades applied\n");
    } else {
        for entry in &report.applied {
            out.push_str(&format!(
                "  ✅ {:>6}  {}  {}\n",
                entry.version,
                entry.script.as_deref().unwrap_or("-"),
                entry.upgrade_date.format("%Y-%m-%d %H:%M:%S")
            ));
        }
    }

    for script in &report.pending {
        out.push_str(&format!("  ⏳ {:>6}  {}\n", script.version, script.name));
    }

    out
}
