//! Command sink writing one line-protocol record per command.
//!
//! `HvacCommands,equipment_id=..,site_id=..,command_type=..,equipment_type=..,source=control-engine value=".." <ns>`

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use hvac_traits::{BoxError, Command, CommandSink};

use crate::error::Result;
use crate::util::{escape_field_string, escape_tag};

pub const MEASUREMENT: &str = "HvacCommands";
pub const SOURCE: &str = "control-engine";

/// Render one command. The timestamp is in nanoseconds.
pub fn format_line(c: &Command) -> String {
    format!(
        "{MEASUREMENT},equipment_id={},site_id={},command_type={},equipment_type={},source={SOURCE} value=\"{}\" {}",
        escape_tag(&c.equipment_id),
        escape_tag(&c.site_id),
        escape_tag(&c.command_type),
        escape_tag(&c.equipment_type),
        escape_field_string(&c.value.to_string()),
        u128::from(c.timestamp_ms) * 1_000_000,
    )
}

pub struct LineProtocolSink<W: Write> {
    out: W,
    written: u64,
}

impl<W: Write> LineProtocolSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl LineProtocolSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl LineProtocolSink<File> {
    /// Append to `path`, creating it and its parent directory when missing.
    pub fn append_to(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(f))
    }
}

impl<W: Write> CommandSink for LineProtocolSink<W> {
    fn send(&mut self, command: &Command) -> std::result::Result<(), BoxError> {
        let line = format_line(command);
        writeln!(self.out, "{line}").map_err(crate::error::AdapterError::from)?;
        self.out.flush().map_err(crate::error::AdapterError::from)?;
        self.written += 1;
        tracing::trace!(
            equipment_id = %command.equipment_id,
            command_type = %command.command_type,
            "command written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hvac_traits::MetricValue;
    use rstest::rstest;

    fn cmd(value: MetricValue) -> Command {
        Command {
            equipment_id: "boiler-1".into(),
            site_id: "site-a".into(),
            equipment_type: "Comfort Boiler".into(),
            command_type: "firing".into(),
            value,
            timestamp_ms: 1_700_000_000_123,
        }
    }

    #[test]
    fn line_has_escaped_tags_and_quoted_value() {
        assert_eq!(
            format_line(&cmd(MetricValue::Number(1.0))),
            "HvacCommands,equipment_id=boiler-1,site_id=site-a,command_type=firing,\
             equipment_type=Comfort\\ Boiler,source=control-engine value=\"1\" 1700000000123000000"
        );
    }

    #[rstest]
    #[case(MetricValue::Number(1.0), r#"value="1""#)]
    #[case(MetricValue::Number(42.5), r#"value="42.5""#)]
    #[case(MetricValue::Bool(false), r#"value="false""#)]
    #[case(MetricValue::Text("say \"hi\"".into()), r#"value="say \"hi\"""#)]
    fn value_field_is_quoted(#[case] value: MetricValue, #[case] field: &str) {
        let line = format_line(&cmd(value));
        assert!(line.contains(field), "{line}");
    }

    #[test]
    fn sink_writes_one_line_per_command() {
        let mut sink = LineProtocolSink::new(Vec::new());
        sink.send(&cmd(MetricValue::Bool(true))).unwrap();
        sink.send(&cmd(MetricValue::Number(42.5))).unwrap();
        assert_eq!(sink.written(), 2);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("value=\"true\""));
        assert!(lines[1].contains("value=\"42.5\""));
    }
}
