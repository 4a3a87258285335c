//! Ban-event log lines.
//!
//! Every ban produces one templated line with access to all record fields
//! plus `ip` and the formatted local timestamp. Output goes to a file
//! (append, created on demand) or to stdout.

use crate::error::BlockLogError;
use crate::record::LogRecord;
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tera::Tera;

/// Timestamp format of the `time` template parameter.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

const TEMPLATE_NAME: &str = "blocklog_line";

pub struct BlockLog {
    writer: Box<dyn Write + Send>,
    tera: Tera,
}

impl BlockLog {
    /// Printer writing to the given file, or stdout when no path is set.
    pub fn create(path: Option<&Path>, template: &str) -> Result<Self, BlockLogError> {
        let writer: Box<dyn Write + Send> = match path {
            Some(path) => Box::new(
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)?,
            ),
            None => Box::new(std::io::stdout()),
        };

        Self::from_writer(writer, template)
    }

    /// Printer over an arbitrary writer. The template is validated here, so
    /// a bad template fails at startup rather than on the first ban.
    pub fn from_writer(
        writer: Box<dyn Write + Send>,
        template: &str,
    ) -> Result<Self, BlockLogError> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, template)?;

        Ok(Self { writer, tera })
    }

    /// Render and write one ban-event line.
    pub fn println(&mut self, record: &LogRecord) -> Result<(), BlockLogError> {
        let mut context = tera::Context::new();

        for (key, value) in record.fields() {
            context.insert(key, value);
        }

        // Reserved parameters win over record fields of the same name.
        context.insert(
            "ip",
            &record.ip().map(|ip| ip.to_string()).unwrap_or_default(),
        );
        context.insert("time", &Local::now().format(TIME_FORMAT).to_string());

        let line = self.tera.render(TEMPLATE_NAME, &context)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;

        Ok(())
    }
}
