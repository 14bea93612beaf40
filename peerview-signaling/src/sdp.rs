//! SDP text helpers used by the command-channel client
//!
//! The device on the other end of the command channel does not trickle ICE:
//! the offer must carry every gathered candidate inline, and the answer
//! carries the device's candidates inline too.

use crate::protocol::IceCandidate;

/// ICE option the device rejects
pub const TRICKLE_RENOMINATION: &str = "a=ice-options:trickle renomination";

/// Remove every `a=ice-options:trickle renomination` line
pub fn strip_ice_options(sdp: &str) -> String {
    let line = format!("{}\r\n", TRICKLE_RENOMINATION);
    sdp.replace(&line, "").replace(TRICKLE_RENOMINATION, "")
}

/// Insert `a=<candidate>` lines after each of the first two `m=` lines
pub fn embed_candidates(sdp: &str, candidates: &[IceCandidate]) -> String {
    if candidates.is_empty() {
        return sdp.to_string();
    }

    let block: String = candidates
        .iter()
        .map(|c| format!("a={}\r\n", c.sdp))
        .collect();

    let mut out = String::with_capacity(sdp.len() + 2 * block.len());
    let mut media_sections = 0;
    for line in sdp.split_inclusive('\n') {
        out.push_str(line);
        if media_sections < 2 && line.starts_with("m=") {
            media_sections += 1;
            if !line.ends_with('\n') {
                out.push_str("\r\n");
            }
            out.push_str(&block);
        }
    }
    out
}

/// Collect the `a=candidate` lines of an answer
///
/// Each candidate is tagged with the `a=mid:` value of the first mid line
/// that follows it; candidates with no later mid line are dropped.
pub fn parse_answer_candidates(sdp: &str) -> Vec<IceCandidate> {
    let mut candidates = Vec::new();
    let mut pending: Vec<&str> = Vec::new();
    let mut mline_index: Option<u32> = None;

    for line in sdp.lines().map(|l| l.trim_end_matches('\r')) {
        if line.starts_with("m=") {
            mline_index = Some(mline_index.map_or(0, |i| i + 1));
        } else if let Some(mid) = line.strip_prefix("a=mid:") {
            let index = mline_index.unwrap_or(0);
            candidates.extend(
                pending
                    .drain(..)
                    .map(|candidate| IceCandidate::new(mid, index, candidate)),
            );
        } else if let Some(candidate) = line.strip_prefix("a=") {
            if candidate.starts_with("candidate") {
                pending.push(candidate);
            }
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        a=ice-options:trickle renomination\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        a=mid:0\r\n\
        a=ice-options:trickle renomination\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
        a=mid:1\r\n\
        m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
        a=mid:2\r\n";

    #[test]
    fn test_strip_ice_options() {
        let stripped = strip_ice_options(OFFER);
        assert!(!stripped.contains("ice-options"));
        assert!(stripped.starts_with("v=0\r\nm=audio"));
    }

    #[test]
    fn test_embed_after_first_two_media_lines() {
        let candidates = vec![
            IceCandidate::new("0", 0, "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host"),
            IceCandidate::new("0", 0, "candidate:2 1 udp 1686052607 1.2.3.4 50000 typ srflx"),
        ];
        let embedded = embed_candidates(&strip_ice_options(OFFER), &candidates);

        assert_eq!(embedded.matches("a=candidate:1 ").count(), 2);
        assert!(embedded.contains(
            "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host\r\n"
        ));
        let application = embedded.find("m=application").unwrap();
        assert!(!embedded[application..].contains("a=candidate"));
    }

    #[test]
    fn test_embed_without_candidates_is_identity() {
        assert_eq!(embed_candidates(OFFER, &[]), OFFER);
    }

    #[test]
    fn test_parse_answer_candidates() {
        let answer = "v=0\r\n\
            m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
            a=candidate:1 1 udp 2122260223 192.168.1.9 41000 typ host\r\n\
            a=mid:audio\r\n\
            m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
            a=candidate:2 1 udp 2122260223 192.168.1.9 41002 typ host\r\n\
            a=candidate:3 1 udp 1686052607 5.6.7.8 41002 typ srflx\r\n\
            a=mid:video\r\n\
            a=candidate:4 1 udp 1 9.9.9.9 1 typ relay\r\n";

        let candidates = parse_answer_candidates(answer);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0].sdp_mid, "audio");
        assert_eq!(candidates[0].sdp_mline_index, 0);
        assert_eq!(
            candidates[0].sdp,
            "candidate:1 1 udp 2122260223 192.168.1.9 41000 typ host"
        );
        assert!(candidates[1..].iter().all(|c| c.sdp_mid == "video" && c.sdp_mline_index == 1));
    }
}
