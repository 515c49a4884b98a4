//! Tees trace output to stdout and to the broadcast channel behind
//! `/api/logs/events`, one trimmed line per event.

use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone)]
pub(crate) struct PanelLogWriter {
    pub sender: tokio::sync::broadcast::Sender<String>,
}

impl<'a> MakeWriter<'a> for PanelLogWriter {
    type Writer = PanelWriter;

    fn make_writer(&'a self) -> Self::Writer {
        PanelWriter {
            sender: self.sender.clone(),
        }
    }
}

pub(crate) struct PanelWriter {
    sender: tokio::sync::broadcast::Sender<String>,
}

impl std::io::Write for PanelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        let _ = self.sender.send(line.trim_end().to_string()); // Ignored if no receivers
        std::io::stdout().write(buf)?;
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}
