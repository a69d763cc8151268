//! Deterministic beam search over next-token logits.

use std::cmp::Ordering;

use tracing::debug;

use crate::error::GenerateError;

/// Language model that scores the next token of a sequence.
pub trait NextTokenModel {
    /// Returns unnormalized logits over the vocabulary for the token that
    /// follows `tokens`.
    fn next_token_logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>, GenerateError>;
}

/// Parameters of one beam search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamSearchConfig {
    pub num_beams: usize,
    /// Upper bound on prompt plus continuation, in tokens.
    pub max_length: usize,
    /// Size of n-grams that may occur only once; `0` disables the ban.
    pub no_repeat_ngram_size: usize,
    /// Stop as soon as `num_beams` finished hypotheses exist.
    pub early_stopping: bool,
    pub length_penalty: f32,
    pub eos_token_id: Option<u32>,
}

#[derive(Debug, Clone)]
struct Beam {
    tokens: Vec<u32>,
    score: f32,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    beam: usize,
    token: u32,
}

/// Highest score first; ties go to the lower beam, then the lower token id.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.beam.cmp(&b.beam))
        .then(a.token.cmp(&b.token))
}

/// Finished sequences, keeping the best `num_beams` by normalized score.
///
/// Scores are normalized by the number of generated tokens, prompt excluded;
/// an end-of-sequence token counts toward that length even though it is not
/// kept in the sequence.
struct Hypotheses {
    num_beams: usize,
    length_penalty: f32,
    early_stopping: bool,
    items: Vec<(f32, Vec<u32>)>,
}

impl Hypotheses {
    fn new(config: &BeamSearchConfig) -> Self {
        Self {
            num_beams: config.num_beams,
            length_penalty: config.length_penalty,
            early_stopping: config.early_stopping,
            items: Vec::with_capacity(config.num_beams + 1),
        }
    }

    fn normalize(&self, sum_logprobs: f32, generated_len: usize) -> f32 {
        sum_logprobs / (generated_len.max(1) as f32).powf(self.length_penalty)
    }

    fn worst(&self) -> f32 {
        self.items
            .iter()
            .map(|(score, _)| *score)
            .fold(f32::INFINITY, f32::min)
    }

    fn add(&mut self, tokens: Vec<u32>, sum_logprobs: f32, generated_len: usize) {
        let score = self.normalize(sum_logprobs, generated_len);
        if self.items.len() < self.num_beams || score > self.worst() {
            self.items.push((score, tokens));
            if self.items.len() > self.num_beams {
                let worst = self
                    .items
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
                    .map(|(idx, _)| idx);
                if let Some(idx) = worst {
                    self.items.remove(idx);
                }
            }
        }
    }

    /// Whether no live beam can still beat the finished hypotheses.
    fn is_done(&self, best_sum_logprobs: f32, generated_len: usize) -> bool {
        if self.items.len() < self.num_beams {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        self.worst() >= self.normalize(best_sum_logprobs, generated_len)
    }

    fn best(self) -> Option<Vec<u32>> {
        self.items
            .into_iter()
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, tokens)| tokens)
    }
}

/// Tokens that would complete an n-gram already present in `tokens`.
pub fn banned_tokens(tokens: &[u32], ngram_size: usize) -> Vec<u32> {
    if ngram_size == 0 || tokens.len() + 1 < ngram_size {
        return Vec::new();
    }
    let prefix = &tokens[tokens.len() + 1 - ngram_size..];
    tokens
        .windows(ngram_size)
        .filter(|window| &window[..ngram_size - 1] == prefix)
        .map(|window| window[ngram_size - 1])
        .collect()
}

fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![f32::NEG_INFINITY; logits.len()];
    }
    let sum: f32 = logits.iter().map(|l| (l - max).exp()).sum();
    let log_sum = sum.ln() + max;
    logits.iter().map(|l| l - log_sum).collect()
}

/// Best `k` continuations of one beam.
fn beam_candidates(
    beam_idx: usize,
    beam: &Beam,
    logits: &[f32],
    config: &BeamSearchConfig,
    k: usize,
) -> Vec<Candidate> {
    let mut logprobs = log_softmax(logits);
    for token in banned_tokens(&beam.tokens, config.no_repeat_ngram_size) {
        if let Some(slot) = logprobs.get_mut(token as usize) {
            *slot = f32::NEG_INFINITY;
        }
    }
    let mut candidates: Vec<Candidate> = logprobs
        .iter()
        .enumerate()
        .filter(|(_, lp)| lp.is_finite())
        .map(|(token, lp)| Candidate {
            score: beam.score + lp,
            beam: beam_idx,
            token: token as u32,
        })
        .collect();
    if candidates.len() > k {
        candidates.select_nth_unstable_by(k - 1, rank);
        candidates.truncate(k);
    }
    candidates.sort_by(rank);
    candidates
}

/// Runs beam search from `prompt`.
///
/// # Details
/// Every step keeps `2 * num_beams` candidates across all live beams.
/// Candidates ending in the end-of-sequence token become finished
/// hypotheses when they rank within the first `num_beams`; the rest fill the
/// next set of live beams. With `early_stopping` the search ends once
/// `num_beams` hypotheses are finished. Beams still live at `max_length`
/// are finalized as hypotheses.
///
/// # Returns
/// The highest-scoring sequence, prompt included. A prompt already at
/// `max_length` is returned unchanged.
///
/// # Errors
/// Propagates failures from the model.
pub fn beam_search<M: NextTokenModel + ?Sized>(
    model: &mut M,
    prompt: &[u32],
    config: &BeamSearchConfig,
) -> Result<Vec<u32>, GenerateError> {
    let width = config.num_beams.max(1);
    let mut hypotheses = Hypotheses::new(config);
    let mut beams = vec![Beam {
        tokens: prompt.to_vec(),
        score: 0.0,
    }];
    let mut done = false;

    while beams[0].tokens.len() < config.max_length {
        let mut candidates = Vec::with_capacity(beams.len() * 2 * width);
        for (idx, beam) in beams.iter().enumerate() {
            let logits = model.next_token_logits(&beam.tokens)?;
            candidates.extend(beam_candidates(idx, beam, &logits, config, 2 * width));
        }
        candidates.sort_by(rank);
        candidates.truncate(2 * width);

        let mut next = Vec::with_capacity(width);
        for (position, candidate) in candidates.iter().enumerate() {
            let parent = &beams[candidate.beam];
            if Some(candidate.token) == config.eos_token_id {
                if position < width {
                    let generated_len = parent.tokens.len() + 1 - prompt.len();
                    hypotheses.add(parent.tokens.clone(), candidate.score, generated_len);
                }
            } else {
                let mut tokens = parent.tokens.clone();
                tokens.push(candidate.token);
                next.push(Beam {
                    tokens,
                    score: candidate.score,
                });
            }
            if next.len() == width {
                break;
            }
        }
        if next.is_empty() {
            break;
        }

        let best = candidates[0].score;
        beams = next;
        if hypotheses.is_done(best, beams[0].tokens.len() - prompt.len()) {
            done = true;
            break;
        }
    }

    if !done {
        for beam in &beams {
            hypotheses.add(beam.tokens.clone(), beam.score, beam.tokens.len() - prompt.len());
        }
    }
    let output = hypotheses
        .best()
        .unwrap_or_else(|| beams[0].tokens.clone());
    debug!(
        prompt_tokens = prompt.len(),
        output_tokens = output.len(),
        "beam search finished"
    );
    Ok(output)
}
