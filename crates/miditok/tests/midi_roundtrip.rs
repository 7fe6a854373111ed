//! Token buffers survive the trip through a Standard MIDI File.

use miditok::{
    midi_to_score, score_to_midi, Event, EventKind, Generator, HeuristicModel, MidiTokenizer,
    SamplingGenerator, SamplingParams, Token,
};
use rand::SeedableRng;
use rand_pcg::Pcg32;

fn prompt(tokenizer: &MidiTokenizer) -> Vec<Token> {
    let events = [
        Event::new(EventKind::TimeSignature, vec![0, 0, 0, 3, 1]),
        Event::new(EventKind::KeySignature, vec![0, 0, 0, 8, 0]),
        Event::new(EventKind::SetTempo, vec![0, 0, 0, 96]),
        Event::new(EventKind::PatchChange, vec![0, 0, 1, 0, 24]),
        Event::new(EventKind::PatchChange, vec![0, 0, 2, 9, 0]),
    ];
    let mut tokens = vec![tokenizer.bos_token()];
    for event in &events {
        tokens.push(tokenizer.event_to_tokens(event).unwrap());
    }
    tokens
}

#[test]
fn test_generated_piece_keeps_its_event_count() {
    let tokenizer = MidiTokenizer::v2();
    let generator = SamplingGenerator::new(tokenizer.clone(), HeuristicModel::default());
    let prompt = prompt(&tokenizer);
    let prompt_len = prompt.len();
    let params = SamplingParams {
        disable_patch_change: true,
        disable_channels: (1..16).filter(|c| *c != 9).collect(),
        ..SamplingParams::default()
    };

    let mut buffer = prompt.clone();
    for token in generator.generate(prompt, prompt_len + 40, params, Pcg32::seed_from_u64(999)) {
        buffer.push(token.unwrap());
    }
    assert_eq!(buffer.len(), prompt_len + 40);

    let bytes = score_to_midi(&tokenizer.detokenize(&buffer)).unwrap();
    let decoded = midi_to_score(&bytes).unwrap();
    let tokens = tokenizer.tokenize(&decoded);

    assert_eq!(tokens.len(), prompt_len + 40);
}

#[test]
fn test_prompt_only_midi_is_small_but_valid() {
    let tokenizer = MidiTokenizer::v2();
    let bytes = score_to_midi(&tokenizer.detokenize(&prompt(&tokenizer))).unwrap();
    assert_eq!(&bytes[..4], b"MThd");

    let decoded = midi_to_score(&bytes).unwrap();
    assert_eq!(decoded.event_count(), 5);
    assert_eq!(decoded.note_count(), 0);
}
