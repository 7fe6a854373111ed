//! Event-by-event token generation.
//!
//! A [`Generator`] turns a prompt into a lazy stream of tokens. The stream is
//! pulled on a blocking thread, one token at a time, so callers can stop
//! between any two tokens by dropping it.

use crate::sampling::sample_masked;
use crate::token::Token;
use crate::tokenizer::{EventKind, MidiTokenizer, Param};
use rand_pcg::Pcg32;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("prompt token {index} has width {width}, expected {expected}")]
    PromptWidth {
        index: usize,
        width: usize,
        expected: usize,
    },

    #[error("invalid sampling parameter {name}: {value}")]
    InvalidParam { name: &'static str, value: String },

    #[error("no admissible id at token position {position}")]
    NoAdmissibleId { position: usize },

    #[error("model error: {0}")]
    Model(String),
}

/// Sampling knobs plus decoding constraints for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: usize,
    pub disable_patch_change: bool,
    pub disable_control_change: bool,
    /// Channels the model may not emit.
    pub disable_channels: Vec<u8>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.85,
            top_p: 0.95,
            top_k: 50,
            disable_patch_change: false,
            disable_control_change: false,
            disable_channels: Vec::new(),
        }
    }
}

impl SamplingParams {
    pub fn validate(&self) -> Result<(), GenerateError> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(GenerateError::InvalidParam {
                name: "temp",
                value: self.temperature.to_string(),
            });
        }
        if !self.top_p.is_finite() || self.top_p <= 0.0 {
            return Err(GenerateError::InvalidParam {
                name: "top_p",
                value: self.top_p.to_string(),
            });
        }
        if self.top_k == 0 {
            return Err(GenerateError::InvalidParam {
                name: "top_k",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

pub type TokenStream<'a> = Box<dyn Iterator<Item = Result<Token, GenerateError>> + Send + 'a>;

/// Produces tokens that continue a prompt.
pub trait Generator: Send + Sync {
    fn tokenizer(&self) -> &MidiTokenizer;

    /// Stream tokens until the sequence (prompt included) holds `max_len`
    /// tokens or an eos token has been yielded. Invalid input surfaces as
    /// the first item.
    fn generate(
        &self,
        prompt: Vec<Token>,
        max_len: usize,
        params: SamplingParams,
        rng: Pcg32,
    ) -> TokenStream<'_>;
}

/// Scores candidate ids for the next position of a token.
pub trait TokenModel: Send + Sync {
    /// Fill `logits` (one slot per vocabulary id) for the id that follows
    /// `partial` within the next token after `history`.
    fn next_logits(
        &self,
        tokenizer: &MidiTokenizer,
        history: &[Token],
        partial: &[u32],
        logits: &mut [f32],
    ) -> Result<(), GenerateError>;
}

/// Masked top-p/top-k sampling over any [`TokenModel`].
pub struct SamplingGenerator<M> {
    tokenizer: MidiTokenizer,
    model: M,
}

impl<M: TokenModel> SamplingGenerator<M> {
    pub fn new(tokenizer: MidiTokenizer, model: M) -> Self {
        Self { tokenizer, model }
    }

    fn check_prompt(&self, prompt: &[Token]) -> Result<(), GenerateError> {
        if prompt.is_empty() {
            return Err(GenerateError::EmptyPrompt);
        }
        let expected = self.tokenizer.max_token_seq();
        for (index, token) in prompt.iter().enumerate() {
            if token.len() != expected {
                return Err(GenerateError::PromptWidth {
                    index,
                    width: token.len(),
                    expected,
                });
            }
        }
        Ok(())
    }
}

impl<M: TokenModel> Generator for SamplingGenerator<M> {
    fn tokenizer(&self) -> &MidiTokenizer {
        &self.tokenizer
    }

    fn generate(
        &self,
        prompt: Vec<Token>,
        max_len: usize,
        params: SamplingParams,
        rng: Pcg32,
    ) -> TokenStream<'_> {
        if let Err(e) = self.check_prompt(&prompt).and_then(|_| params.validate()) {
            return Box::new(std::iter::once(Err(e)));
        }

        let mut channel_open = [true; 16];
        for ch in &params.disable_channels {
            if let Some(slot) = channel_open.get_mut(usize::from(*ch)) {
                *slot = false;
            }
        }

        Box::new(Sampling {
            generator: self,
            logits: vec![0.0; self.tokenizer.vocab_size() as usize],
            history: prompt,
            max_len,
            params,
            channel_open,
            rng,
            done: false,
        })
    }
}

struct Sampling<'a, M> {
    generator: &'a SamplingGenerator<M>,
    history: Vec<Token>,
    max_len: usize,
    params: SamplingParams,
    channel_open: [bool; 16],
    rng: Pcg32,
    logits: Vec<f32>,
    done: bool,
}

impl<M: TokenModel> Sampling<'_, M> {
    fn head_ids(&self) -> Vec<u32> {
        let tokenizer = &self.generator.tokenizer;
        let mut ids: Vec<u32> = tokenizer
            .event_ids()
            .filter(|(kind, _)| match kind {
                EventKind::PatchChange => !self.params.disable_patch_change,
                EventKind::ControlChange => !self.params.disable_control_change,
                _ => true,
            })
            .map(|(_, id)| id)
            .collect();
        ids.push(MidiTokenizer::EOS_ID);
        ids
    }

    fn param_ids(&self, param: Param) -> Vec<u32> {
        let Some(range) = self.generator.tokenizer.param_range(param) else {
            return Vec::new();
        };
        if param == Param::Channel {
            range
                .zip(self.channel_open.iter())
                .filter(|(_, open)| **open)
                .map(|(id, _)| id)
                .collect()
        } else {
            range.collect()
        }
    }

    fn next_token(&mut self) -> Result<Token, GenerateError> {
        let generator = self.generator;
        let tokenizer = &generator.tokenizer;
        let width = tokenizer.max_token_seq();
        let mut ids: Vec<u32> = Vec::with_capacity(width);
        let mut kind: Option<EventKind> = None;

        for position in 0..width {
            let allowed = match kind {
                None => self.head_ids(),
                Some(k) => match k.params().get(position - 1) {
                    Some(param) => self.param_ids(*param),
                    None => break,
                },
            };

            generator
                .model
                .next_logits(tokenizer, &self.history, &ids, &mut self.logits)?;
            let id = sample_masked(
                &self.logits,
                &allowed,
                self.params.temperature,
                self.params.top_p,
                self.params.top_k,
                &mut self.rng,
            )
            .ok_or(GenerateError::NoAdmissibleId { position })?;
            ids.push(id);

            if position == 0 {
                if id == MidiTokenizer::EOS_ID {
                    break;
                }
                kind = tokenizer.kind_for_id(id);
                if kind.is_none() {
                    break;
                }
            }
        }

        ids.resize(width, MidiTokenizer::PAD_ID);
        Ok(Token::new(ids))
    }
}

impl<M: TokenModel> Iterator for Sampling<'_, M> {
    type Item = Result<Token, GenerateError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.history.len() >= self.max_len {
            self.done = true;
            return None;
        }

        match self.next_token() {
            Ok(token) => {
                if self.generator.tokenizer.is_eos(&token) {
                    self.done = true;
                }
                self.history.push(token.clone());
                Some(Ok(token))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// Uniform over whatever the mask allows.
    struct FlatModel;

    impl TokenModel for FlatModel {
        fn next_logits(
            &self,
            _tokenizer: &MidiTokenizer,
            _history: &[Token],
            _partial: &[u32],
            logits: &mut [f32],
        ) -> Result<(), GenerateError> {
            logits.fill(0.0);
            Ok(())
        }
    }

    /// Strongly prefers notes and never ends.
    struct NoteModel;

    impl TokenModel for NoteModel {
        fn next_logits(
            &self,
            tokenizer: &MidiTokenizer,
            _history: &[Token],
            _partial: &[u32],
            logits: &mut [f32],
        ) -> Result<(), GenerateError> {
            logits.fill(0.0);
            if let Some(id) = tokenizer.event_id(EventKind::Note) {
                logits[id as usize] = 20.0;
            }
            logits[MidiTokenizer::EOS_ID as usize] = -100.0;
            Ok(())
        }
    }

    /// Puts its weight on everything the constraints forbid.
    struct TemptingModel;

    impl TokenModel for TemptingModel {
        fn next_logits(
            &self,
            tokenizer: &MidiTokenizer,
            _history: &[Token],
            _partial: &[u32],
            logits: &mut [f32],
        ) -> Result<(), GenerateError> {
            logits.fill(0.0);
            for kind in [EventKind::PatchChange, EventKind::ControlChange] {
                if let Some(id) = tokenizer.event_id(kind) {
                    logits[id as usize] = 50.0;
                }
            }
            if let Some(range) = tokenizer.param_range(Param::Channel) {
                for id in range.skip(1) {
                    logits[id as usize] = 50.0;
                }
            }
            logits[MidiTokenizer::EOS_ID as usize] = -100.0;
            Ok(())
        }
    }

    /// Always wants to end the piece.
    struct EndingModel;

    impl TokenModel for EndingModel {
        fn next_logits(
            &self,
            _tokenizer: &MidiTokenizer,
            _history: &[Token],
            _partial: &[u32],
            logits: &mut [f32],
        ) -> Result<(), GenerateError> {
            logits.fill(0.0);
            logits[MidiTokenizer::EOS_ID as usize] = 100.0;
            Ok(())
        }
    }

    fn collect(
        generator: &dyn Generator,
        max_len: usize,
        params: SamplingParams,
        seed: u64,
    ) -> Vec<Result<Token, GenerateError>> {
        let prompt = vec![generator.tokenizer().bos_token()];
        generator
            .generate(prompt, max_len, params, Pcg32::seed_from_u64(seed))
            .collect()
    }

    #[test]
    fn test_generates_up_to_max_len() {
        let generator = SamplingGenerator::new(MidiTokenizer::v2(), NoteModel);
        let tokens = collect(&generator, 31, SamplingParams::default(), 1);
        assert_eq!(tokens.len(), 30);
        for token in tokens {
            let token = token.unwrap();
            assert_eq!(token.len(), 8);
            let event = generator.tokenizer().tokens_to_event(&token).unwrap();
            assert_eq!(event.kind, EventKind::Note);
        }
    }

    #[test]
    fn test_constraints_respected() {
        let tokenizer = MidiTokenizer::v2();
        let generator = SamplingGenerator::new(tokenizer.clone(), TemptingModel);
        let params = SamplingParams {
            disable_patch_change: true,
            disable_control_change: true,
            disable_channels: (1..16).collect(),
            ..SamplingParams::default()
        };

        let tokens = collect(&generator, 101, params, 3);
        assert_eq!(tokens.len(), 100);
        for token in tokens {
            let event = tokenizer.tokens_to_event(&token.unwrap()).unwrap();
            assert_ne!(event.kind, EventKind::PatchChange);
            assert_ne!(event.kind, EventKind::ControlChange);
            if let Some(channel) = event.get(Param::Channel) {
                assert_eq!(channel, 0);
            }
        }
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let generator = SamplingGenerator::new(MidiTokenizer::v2(), FlatModel);
        let run = |seed| -> Vec<Token> {
            collect(&generator, 20, SamplingParams::default(), seed)
                .into_iter()
                .map(Result::unwrap)
                .collect()
        };
        assert_eq!(run(999), run(999));
    }

    #[test]
    fn test_eos_ends_stream() {
        let tokenizer = MidiTokenizer::v2();
        let generator = SamplingGenerator::new(tokenizer.clone(), EndingModel);
        let tokens = collect(&generator, 50, SamplingParams::default(), 1);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].as_ref().unwrap(), &tokenizer.eos_token());
    }

    #[test]
    fn test_invalid_input_is_first_item() {
        let generator = SamplingGenerator::new(MidiTokenizer::v2(), FlatModel);

        let params = SamplingParams {
            temperature: 0.0,
            ..SamplingParams::default()
        };
        let items = collect(&generator, 10, params, 1);
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(GenerateError::InvalidParam { name: "temp", .. })
        ));

        let items: Vec<_> = generator
            .generate(vec![], 10, SamplingParams::default(), Pcg32::seed_from_u64(1))
            .collect();
        assert!(matches!(items[0], Err(GenerateError::EmptyPrompt)));
    }

    #[test]
    fn test_no_open_channel_is_error() {
        let generator = SamplingGenerator::new(MidiTokenizer::v2(), NoteModel);
        let params = SamplingParams {
            disable_channels: (0..16).collect(),
            ..SamplingParams::default()
        };
        let items = collect(&generator, 20, params, 5);
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(GenerateError::NoAdmissibleId { position: 4 })
        ));
    }
}
