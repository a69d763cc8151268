//! GPT-2 decoder implemented on candle.
//!
//! Loads Hugging Face `GPT2LMHeadModel` checkpoints. The language-model head
//! is tied to the token embedding. Every call re-runs the full sequence;
//! there is no KV cache.

use std::path::Path;

use candle_core::{DType, Device, IndexOp, Module, Result as CandleResult, Tensor, D};
use candle_nn::{embedding, layer_norm, Embedding, LayerNorm, VarBuilder};
use serde::Deserialize;
use tracing::info;

use crate::error::{GenerateError, ModelLoadError};
use crate::generate::beam::NextTokenModel;

/// Subset of `config.json` needed to build the network.
#[derive(Debug, Clone, Deserialize)]
pub struct Gpt2Config {
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,
    #[serde(default = "default_n_positions")]
    pub n_positions: usize,
    #[serde(default = "default_n_embd")]
    pub n_embd: usize,
    #[serde(default = "default_n_layer")]
    pub n_layer: usize,
    #[serde(default = "default_n_head")]
    pub n_head: usize,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
}

fn default_vocab_size() -> usize {
    50257
}

fn default_n_positions() -> usize {
    1024
}

fn default_n_embd() -> usize {
    768
}

fn default_n_layer() -> usize {
    12
}

fn default_n_head() -> usize {
    12
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

impl Gpt2Config {
    /// Reads and parses a checkpoint `config.json`.
    pub fn from_file(path: &Path) -> Result<Self, ModelLoadError> {
        let config_error = |message: String| ModelLoadError::Config {
            path: path.display().to_string(),
            message,
        };
        let raw = std::fs::read_to_string(path).map_err(|err| config_error(err.to_string()))?;
        serde_json::from_str(&raw).map_err(|err| config_error(err.to_string()))
    }
}

/// GPT-2's transposed linear layer: weights are stored as `(in, out)`.
struct Conv1D {
    weight: Tensor,
    bias: Tensor,
}

impl Conv1D {
    fn load(in_dim: usize, out_dim: usize, vb: VarBuilder) -> CandleResult<Self> {
        Ok(Self {
            weight: vb.get((in_dim, out_dim), "weight")?,
            bias: vb.get(out_dim, "bias")?,
        })
    }

    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor> {
        xs.broadcast_matmul(&self.weight)?.broadcast_add(&self.bias)
    }
}

struct Attention {
    c_attn: Conv1D,
    c_proj: Conv1D,
    n_head: usize,
    head_dim: usize,
}

impl Attention {
    fn load(cfg: &Gpt2Config, vb: VarBuilder) -> CandleResult<Self> {
        Ok(Self {
            c_attn: Conv1D::load(cfg.n_embd, 3 * cfg.n_embd, vb.pp("c_attn"))?,
            c_proj: Conv1D::load(cfg.n_embd, cfg.n_embd, vb.pp("c_proj"))?,
            n_head: cfg.n_head,
            head_dim: cfg.n_embd / cfg.n_head,
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor) -> CandleResult<Tensor> {
        let (b, t, c) = xs.dims3()?;
        let qkv = self.c_attn.forward(xs)?;
        let heads = |offset: usize| -> CandleResult<Tensor> {
            qkv.narrow(D::Minus1, offset, c)?
                .reshape((b, t, self.n_head, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = heads(0)?;
        let k = heads(c)?;
        let v = heads(2 * c)?;

        let att = (q.matmul(&k.t()?.contiguous()?)? / (self.head_dim as f64).sqrt())?;
        let neg_inf = Tensor::new(f32::NEG_INFINITY, xs.device())?.broadcast_as(att.shape())?;
        let att = mask.broadcast_as(att.shape())?.where_cond(&neg_inf, &att)?;
        let att = candle_nn::ops::softmax_last_dim(&att)?;
        let y = att.matmul(&v)?;
        let y = y.transpose(1, 2)?.reshape((b, t, c))?;
        self.c_proj.forward(&y)
    }
}

struct Mlp {
    c_fc: Conv1D,
    c_proj: Conv1D,
}

impl Mlp {
    fn load(cfg: &Gpt2Config, vb: VarBuilder) -> CandleResult<Self> {
        Ok(Self {
            c_fc: Conv1D::load(cfg.n_embd, 4 * cfg.n_embd, vb.pp("c_fc"))?,
            c_proj: Conv1D::load(4 * cfg.n_embd, cfg.n_embd, vb.pp("c_proj"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor> {
        // GPT-2 uses the tanh approximation, which is candle's `gelu`.
        self.c_proj.forward(&self.c_fc.forward(xs)?.gelu()?)
    }
}

struct Block {
    ln_1: LayerNorm,
    attn: Attention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn load(cfg: &Gpt2Config, vb: VarBuilder) -> CandleResult<Self> {
        Ok(Self {
            ln_1: layer_norm(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_1"))?,
            attn: Attention::load(cfg, vb.pp("attn"))?,
            ln_2: layer_norm(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_2"))?,
            mlp: Mlp::load(cfg, vb.pp("mlp"))?,
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor) -> CandleResult<Tensor> {
        let xs = (xs + self.attn.forward(&self.ln_1.forward(xs)?, mask)?)?;
        &xs + self.mlp.forward(&self.ln_2.forward(&xs)?)?
    }
}

/// GPT-2 language model with tied output head.
pub struct Gpt2 {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    config: Gpt2Config,
    device: Device,
}

impl Gpt2 {
    /// Builds the network from a variable builder rooted at the checkpoint.
    ///
    /// # Details
    /// Accepts checkpoints with or without the `transformer.` prefix.
    pub fn load(config: Gpt2Config, vb: VarBuilder) -> CandleResult<Self> {
        let vb = if vb.contains_tensor("transformer.wte.weight") {
            vb.pp("transformer")
        } else {
            vb
        };
        let wte = embedding(config.vocab_size, config.n_embd, vb.pp("wte"))?;
        let wpe = embedding(config.n_positions, config.n_embd, vb.pp("wpe"))?;
        let blocks = (0..config.n_layer)
            .map(|idx| Block::load(&config, vb.pp(format!("h.{idx}"))))
            .collect::<CandleResult<Vec<_>>>()?;
        let ln_f = layer_norm(config.n_embd, config.layer_norm_epsilon, vb.pp("ln_f"))?;
        Ok(Self {
            wte,
            wpe,
            blocks,
            ln_f,
            device: vb.device().clone(),
            config,
        })
    }

    /// Memory-maps `model.safetensors` and builds the network on the CPU.
    pub fn from_safetensors(config: Gpt2Config, weights: &Path) -> Result<Self, ModelLoadError> {
        let device = Device::Cpu;
        // SAFETY: the checkpoint file is not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights.to_path_buf()], DType::F32, &device)?
        };
        let model = Self::load(config, vb)?;
        info!(
            layers = model.config.n_layer,
            hidden = model.config.n_embd,
            "GPT-2 weights loaded"
        );
        Ok(model)
    }

    pub fn config(&self) -> &Gpt2Config {
        &self.config
    }

    /// Logits for the token after `tokens`.
    fn forward(&self, tokens: &[u32]) -> CandleResult<Tensor> {
        let t = tokens.len();
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let positions = Tensor::arange(0u32, t as u32, &self.device)?.unsqueeze(0)?;
        let mut xs = self
            .wte
            .forward(&input)?
            .broadcast_add(&self.wpe.forward(&positions)?)?;
        let mask = causal_mask(t, &self.device)?;
        for block in &self.blocks {
            xs = block.forward(&xs, &mask)?;
        }
        let xs = self.ln_f.forward(&xs)?;
        let last = xs.i((.., t - 1, ..))?;
        last.matmul(&self.wte.embeddings().t()?)?.squeeze(0)
    }
}

impl NextTokenModel for Gpt2 {
    fn next_token_logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>, GenerateError> {
        if tokens.is_empty() {
            return Err(GenerateError::EmptyPrompt);
        }
        if tokens.len() > self.config.n_positions {
            return Err(GenerateError::InvalidRequest(format!(
                "sequence of {} tokens exceeds the {} token context window",
                tokens.len(),
                self.config.n_positions
            )));
        }
        Ok(self.forward(tokens)?.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }
}

/// `1` above the diagonal, marking future positions to hide.
fn causal_mask(t: usize, device: &Device) -> CandleResult<Tensor> {
    let mask: Vec<u8> = (0..t)
        .flat_map(|i| (0..t).map(move |j| u8::from(j > i)))
        .collect();
    Tensor::from_slice(&mask, (t, t), device)
}
