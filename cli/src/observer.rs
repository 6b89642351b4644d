use chunkup_core::{UploadEvent, UploadObserver};
use indicatif::{ProgressBar, ProgressStyle};

/// Renders upload events as a percent bar with the text log printed above it.
pub struct TerminalObserver {
    bar: ProgressBar,
}

impl TerminalObserver {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(100))
    }

    pub fn with_bar(bar: ProgressBar) -> Self {
        bar.set_length(100);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{bar:40.cyan/blue}] {pos:>3}% {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar }
    }

    fn log(&self, line: &str) {
        if self.bar.is_hidden() {
            println!("{line}");
        } else {
            self.bar.println(line);
        }
    }
}

impl Default for TerminalObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadObserver for TerminalObserver {
    fn on_event(&self, event: UploadEvent) {
        let line = event.log_line();
        match event {
            UploadEvent::Started {
                filename,
                total_chunks,
                ..
            } => {
                self.bar.set_message(format!("{filename} ({total_chunks} chunks)"));
                self.bar.reset();
            }
            UploadEvent::Progress { percent, .. } => {
                self.bar.set_position(percent.clamp(0., 100.) as u64);
            }
            UploadEvent::ChunkUploaded { .. } => {}
            UploadEvent::Completed { .. } => {
                self.bar.set_position(100);
                self.bar.finish();
            }
            UploadEvent::Failed { .. } | UploadEvent::Cancelled { .. } => {
                self.bar.abandon();
            }
        }
        if let Some(line) = line {
            self.log(&line);
        }
    }
}
