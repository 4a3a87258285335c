//! External block action.
//!
//! The action is an argv of template strings; position 0 is the command
//! path. Each element renders independently against the banned record, so a
//! field value can never be interpreted as a shell string. The child runs
//! synchronously; its merged stdout+stderr is logged when non-empty and a
//! non-zero exit bubbles up as the action error.

use crate::error::ActionError;
use crate::record::LogRecord;
use tera::Tera;
use tokio::process::Command;
use tracing::info;

fn template_name(index: usize) -> String {
    format!("arg{index}")
}

pub struct Action {
    argv: Vec<String>,
    tera: Tera,
}

impl Action {
    /// Compile the argv templates. An empty argv makes the action a no-op.
    pub fn new(argv: Vec<String>) -> Result<Self, ActionError> {
        let mut tera = Tera::default();

        for (index, template) in argv.iter().enumerate() {
            tera.add_raw_template(&template_name(index), template)?;
        }

        Ok(Self { argv, tera })
    }

    pub fn is_noop(&self) -> bool {
        self.argv.is_empty()
    }

    /// Render the argv against a record: `ip` plus every record field.
    fn render(&self, record: &LogRecord) -> Result<Vec<String>, ActionError> {
        let mut context = tera::Context::new();

        for (key, value) in record.fields() {
            context.insert(key, value);
        }
        context.insert(
            "ip",
            &record.ip().map(|ip| ip.to_string()).unwrap_or_default(),
        );

        (0..self.argv.len())
            .map(|index| {
                self.tera
                    .render(&template_name(index), &context)
                    .map_err(ActionError::Template)
            })
            .collect()
    }

    /// Run the block action for one banned record.
    pub async fn execute(&self, record: &LogRecord) -> Result<(), ActionError> {
        if self.is_noop() {
            return Ok(());
        }

        let argv = self.render(record)?;
        info!(command = ?argv, "executing block action");

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .await
            .map_err(|source| ActionError::Spawn {
                command: argv[0].clone(),
                source,
            })?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        if !combined.is_empty() {
            info!(
                command = %argv[0],
                output = %String::from_utf8_lossy(&combined).trim_end(),
                "block action output"
            );
        }

        if !output.status.success() {
            return Err(ActionError::Failed {
                command: argv[0].clone(),
                status: output.status,
            });
        }

        Ok(())
    }
}
