//! Process memory probing for the adaptive cache sizer.
//!
//! Linux-only data sources: RSS pages from `/proc/self/statm` scaled by the
//! libc page size, and the machine total from `/proc/meminfo`. On other
//! platforms (or unreadable procfs) the probe yields `None` and the sizer
//! falls back to traffic-based sizing.

/// One memory reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
    pub rss_bytes: u64,
    pub total_bytes: u64,
}

impl MemorySample {
    /// Fraction of machine memory this process occupies, in [0,1].
    pub fn rss_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.rss_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }
}

/// Reads process and machine memory numbers.
pub struct MemoryProbe {
    page_size: u64,
}

impl MemoryProbe {
    pub fn new() -> Self {
        #[cfg(unix)]
        let page_size = {
            let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if raw > 0 {
                raw as u64
            } else {
                4096
            }
        };
        #[cfg(not(unix))]
        let page_size = 4096;

        Self { page_size }
    }

    /// Take a reading; `None` when either source is unavailable.
    pub fn sample(&self) -> Option<MemorySample> {
        let rss_bytes = self.read_rss()?;
        let total_bytes = read_total_memory()?;
        Some(MemorySample {
            rss_bytes,
            total_bytes,
        })
    }

    fn read_rss(&self) -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(rss_pages * self.page_size)
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn read_total_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rss_fraction_is_clamped() {
        let s = MemorySample {
            rss_bytes: 2048,
            total_bytes: 1024,
        };
        assert_eq!(s.rss_fraction(), 1.0);
        let zero = MemorySample {
            rss_bytes: 100,
            total_bytes: 0,
        };
        assert_eq!(zero.rss_fraction(), 0.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn probe_reads_this_process() {
        let probe = MemoryProbe::new();
        let sample = probe.sample().expect("procfs should be readable on linux");
        assert!(sample.rss_bytes > 0);
        assert!(sample.total_bytes > sample.rss_bytes);
    }
}
