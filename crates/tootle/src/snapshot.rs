//! Periodic MIDI snapshots of the buffer being streamed.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use miditok::{score_to_midi, MidiTokenizer, SerializeError, Token};
use tootleproto::StreamMessage;

/// Whether event number `count` (1-based) should be followed by a snapshot.
pub fn is_snapshot_point(count: u64, target: u64, every: u64) -> bool {
    (every > 0 && count % every == 0) || count == target
}

/// Render a token buffer to Standard MIDI File bytes.
pub fn render_midi(tokenizer: &MidiTokenizer, buffer: &[Token]) -> Result<Vec<u8>, SerializeError> {
    let score = tokenizer.detokenize(buffer);
    score_to_midi(&score)
}

/// Re-encode the whole buffer, prompt included, as a snapshot message.
pub fn encode_snapshot(
    tokenizer: &MidiTokenizer,
    buffer: &[Token],
    index: u64,
) -> Result<StreamMessage, SerializeError> {
    let midi = render_midi(tokenizer, buffer)?;
    Ok(StreamMessage::Snapshot {
        index,
        total_events: buffer.len() as u64,
        size_bytes: midi.len() as u64,
        midi_b64: BASE64.encode(&midi),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use miditok::{Event, EventKind};

    #[test]
    fn test_snapshot_cadence() {
        let points: Vec<u64> = (1..=45).filter(|c| is_snapshot_point(*c, 45, 20)).collect();
        assert_eq!(points, vec![20, 40, 45]);

        let points: Vec<u64> = (1..=40).filter(|c| is_snapshot_point(*c, 40, 20)).collect();
        assert_eq!(points, vec![20, 40]);
    }

    #[test]
    fn test_snapshot_covers_whole_buffer() {
        let tok = MidiTokenizer::v2();
        let mut buffer = vec![tok.bos_token()];
        buffer.push(
            tok.event_to_tokens(&Event::new(EventKind::SetTempo, vec![0, 0, 0, 120]))
                .unwrap(),
        );
        for _ in 0..3 {
            buffer.push(
                tok.event_to_tokens(&Event::new(EventKind::Note, vec![1, 0, 0, 0, 60, 90, 4]))
                    .unwrap(),
            );
        }

        let StreamMessage::Snapshot {
            index,
            total_events,
            midi_b64,
            size_bytes,
        } = encode_snapshot(&tok, &buffer, 3).unwrap()
        else {
            panic!("expected a snapshot");
        };
        assert_eq!(index, 3);
        assert_eq!(total_events, 5);

        let midi = BASE64.decode(midi_b64).unwrap();
        assert_eq!(midi.len() as u64, size_bytes);
        assert_eq!(&midi[..4], b"MThd");
        assert_eq!(miditok::midi_to_score(&midi).unwrap().note_count(), 3);
    }
}
