//! Terminal output of the utility binary.

use console::Style;

use agent_control::config::{ServerConfig, mask};
use agent_control::state_machine::{EntityStatus, Lifecycle};

pub struct Output {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }
}

impl Output {
    pub fn success(&self, message: &str) {
        eprintln!("  {} {message}", self.green.apply_to("✓"));
    }

    pub fn failure(&self, message: &str) {
        eprintln!("  {} {message}", self.red.apply_to("✗"));
    }

    /// Raw value on stdout so it can be piped.
    pub fn value(&self, value: &str) {
        println!("{value}");
    }

    pub fn lifecycle(&self) {
        println!("{}", Lifecycle::mermaid_diagram());
        eprintln!();
        for status in EntityStatus::ALL {
            let style = if status.is_terminal() {
                &self.red
            } else if status.is_running() {
                &self.green
            } else {
                &self.yellow
            };
            let targets: Vec<String> = Lifecycle::valid_transitions(status)
                .iter()
                .map(|s| s.to_string())
                .collect();
            eprintln!(
                "  {} {}",
                style.apply_to(format!("{:<12}", status.as_str())),
                self.dim.apply_to(if targets.is_empty() {
                    "(terminal)".to_string()
                } else {
                    format!("-> {}", targets.join(", "))
                })
            );
        }
    }

    pub fn config(&self, config: &ServerConfig) {
        println!("{}", self.green.apply_to("─── Configuration ───"));
        println!("scheme            = {}", config.scheme);
        println!("host              = {}", config.host);
        println!("port              = {}", config.port);
        println!("environment       = {}", config.environment);
        println!("url               = {}", config.url());
        println!(
            "private_key_path  = {}",
            config
                .private_key_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| self.dim.apply_to("(generated)").to_string())
        );
        match &config.account {
            Some(account) => {
                println!("account.api_url   = {}", account.api_url);
                println!("account.api_key   = {}", mask(&account.api_key));
                println!("account.workspace = {}", account.workspace_id);
            }
            None => println!("account           = {}", self.dim.apply_to("(none)")),
        }
    }
}
