use log::{info, warn};

/// Число кандидатов по типам в описании сессии
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

impl CandidateSummary {
    pub fn total(&self) -> usize {
        self.host + self.srflx + self.relay
    }
}

/// Считает строки `a=candidate` и логирует, что сможет попробовать пир
pub fn analyze_candidates(sdp: &str) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for line in sdp.lines().map(str::trim) {
        if !line.starts_with("a=candidate:") {
            continue;
        }
        if line.contains("typ host") {
            summary.host += 1;
        } else if line.contains("typ srflx") {
            summary.srflx += 1;
        } else if line.contains("typ relay") {
            summary.relay += 1;
        }
    }

    info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );

    if summary.total() == 0 {
        warn!("Descriptor carries no candidates; the remote peer has no path to try");
    } else if summary.srflx == 0 && summary.relay == 0 {
        warn!("Only host candidates found; connecting across NAT may fail");
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_type() {
        let sdp = "v=0\r\n\
            a=candidate:1 1 udp 2130706431 192.168.1.4 51334 typ host\r\n\
            a=candidate:2 1 udp 2130706431 10.0.0.2 51335 typ host\r\n\
            a=candidate:3 1 udp 1694498815 203.0.113.9 40000 typ srflx raddr 0.0.0.0 rport 51334\r\n\
            a=candidate:4 1 udp 16777215 198.51.100.1 3478 typ relay raddr 203.0.113.9 rport 40000\r\n\
            a=end-of-candidates\r\n";
        let summary = analyze_candidates(sdp);
        assert_eq!(
            summary,
            CandidateSummary {
                host: 2,
                srflx: 1,
                relay: 1
            }
        );
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn test_ignores_non_candidate_lines() {
        let summary = analyze_candidates("v=0\r\na=ice-ufrag:typ host\r\n");
        assert_eq!(summary.total(), 0);
    }
}
