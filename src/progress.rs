use indicatif::{ProgressBar, ProgressStyle};

use crate::app::{PhaseEvent, ReportReceivers};
use crate::download::DownloadEvent;

const BAR_TEMPLATE: &str =
    "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

fn byte_bar(total: Option<u64>, name: String) -> ProgressBar {
    let bar = match total {
        Some(len) => ProgressBar::new(len).with_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        ),
        None => ProgressBar::new_spinner(),
    };
    bar.set_message(name);
    bar
}

#[derive(Default)]
struct Screen {
    bar: Option<ProgressBar>,
}

impl Screen {
    fn phase(&self, ev: PhaseEvent) {
        self.line(format!("[{}/{}] {}", ev.step, ev.total, ev.phase.label()));
    }

    fn download(&mut self, ev: DownloadEvent) {
        match ev {
            DownloadEvent::Started { name, total } => {
                self.bar = Some(byte_bar(total, name));
            }
            DownloadEvent::Progress { bytes } => {
                if let Some(bar) = &self.bar {
                    bar.set_position(bytes);
                }
            }
            DownloadEvent::Complete { bytes } => {
                if let Some(bar) = self.bar.take() {
                    bar.set_position(bytes);
                    bar.finish();
                }
            }
            DownloadEvent::Cached { path } => {
                self.line(format!("      using cached {}", path.display()));
            }
        }
    }

    /// Print above an active progress bar instead of through it.
    fn line(&self, text: String) {
        match &self.bar {
            Some(bar) => bar.println(text),
            None => println!("{}", text),
        }
    }
}

/// Print phase banners, drive the download bar and echo process output until
/// every sender has been dropped.
pub async fn render(mut rx: ReportReceivers) {
    let mut screen = Screen::default();
    let (mut phases, mut downloads, mut output) = (true, true, true);

    while phases || downloads || output {
        tokio::select! {
            ev = rx.phases.recv(), if phases => match ev {
                Some(ev) => screen.phase(ev),
                None => phases = false,
            },
            ev = rx.downloads.recv(), if downloads => match ev {
                Some(ev) => screen.download(ev),
                None => downloads = false,
            },
            line = rx.output.recv(), if output => match line {
                Some(line) => screen.line(line),
                None => output = false,
            },
        }
    }

    if let Some(bar) = screen.bar.take() {
        bar.abandon();
    }
}
