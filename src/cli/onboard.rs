//! Onboard command - Initialize configuration and workspace.

use anyhow::Result;
use crate::config;
use super::helpers::ensure_workspace_dirs;

/// Default static schedule: the weekly planning run, Sunday 23:00 local.
const DEFAULT_STATIC_SCHEDULES: &str = r#"[
    {
        "task_name": "weekly_planning",
        "schedule": { "day": "sunday", "at": "23:00" },
        "task_args": {}
    }
]
"#;

pub async fn cmd_onboard() -> Result<()> {
    let cfg_path = config::config_path();
    if cfg_path.exists() {
        println!("Config already exists at {}", cfg_path.display());
        println!("Delete it first if you want to re-initialize.");
        return Ok(());
    }

    let cfg = config::Config::default();
    config::save_config(&cfg, None)?;
    println!("✓ Created config at {}", cfg_path.display());

    let ws = config::workspace_path(&cfg);
    ensure_workspace_dirs(&ws)?;
    create_workspace_templates(&ws)?;
    println!("✓ Created workspace at {}", ws.display());

    println!("\npostpilot is ready!");
    println!("\nNext steps:");
    println!("  1. Add your API key to {}", cfg_path.display());
    println!(
        "  2. Describe your account in {}",
        config::content_rules_path(&ws).display()
    );
    println!("  3. Chat: postpilot agent -m \"Plan this week's posts\"");
    println!("  4. Run the daemon: postpilot start");
    Ok(())
}

/// Template content is read from the crate's templates/ at compile time.
fn create_workspace_templates(ws: &std::path::Path) -> Result<()> {
    let files: &[(std::path::PathBuf, &str)] = &[
        (
            config::content_rules_path(ws),
            include_str!("../../templates/content_rules.md"),
        ),
        (config::static_schedules_path(ws), DEFAULT_STATIC_SCHEDULES),
        (config::generated_schedules_path(ws), "[]\n"),
    ];
    for (path, content) in files {
        if !path.exists() {
            std::fs::write(path, content)?;
        }
    }
    Ok(())
}
