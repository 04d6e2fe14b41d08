pub mod ask;
pub mod ingest;

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar for `len` items, or a spinner when there is nothing to count.
pub fn progress_bar(len: u64) -> ProgressBar {
    if len == 0 {
        return ProgressBar::new_spinner();
    }
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("  {bar:40.cyan/blue} {pos}/{len} records ({eta})")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}
