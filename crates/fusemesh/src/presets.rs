//! Einsum groups of one transformer layer
//!
//! Each group is a ready-to-schedule [`EinsumGraph`]. Dimension names follow
//! one convention throughout:
//!
//! | dim | meaning |
//! |-----|---------|
//! | `B` | batch |
//! | `D` | model width |
//! | `E` | query/key width per head |
//! | `F` | value width per head |
//! | `H` | heads |
//! | `M` | key/value sequence, outer part |
//! | `N` | key/value sequence, inner part (one 2D-mesh row) |
//! | `P` | query sequence |
//! | `S` | feed-forward hidden width |
//!
//! # Examples
//!
//! ```
//! use fusemesh::presets::LayerGroup;
//!
//! let attention = LayerGroup::Attention.graph()?;
//! assert_eq!(attention.len(), 12);
//! assert_eq!(LayerGroup::Attention.scheduler_config().preserved_edges.len(), 2);
//! # Ok::<(), fusemesh::core::FusemeshError>(())
//! ```

use fusemesh_core::{
    ComputeCost, Extents, FusemeshError, Operation, Primitive, Result, SchedulerConfig,
};
use fusemesh_sched::{EinsumGraph, EstimateModel};
use std::fmt;

/// Feed-forward activation; decides the compute cost of `AR`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activation {
    Relu,
    Gelu,
    Silu,
}

impl Activation {
    /// Activation used by a known model family
    pub fn for_model(model: &str) -> Option<Self> {
        match model {
            "BERT" | "XLM" => Some(Activation::Gelu),
            "TrXL" | "T5" => Some(Activation::Relu),
            "Llama3" => Some(Activation::Silu),
            _ => None,
        }
    }

    /// Per-element cost of the activation einsum
    pub fn compute_cost(self) -> ComputeCost {
        match self {
            Activation::Relu => ComputeCost::new().with(Primitive::Max, 1),
            // Polynomial/exponential approximation, then one division
            Activation::Gelu | Activation::Silu => ComputeCost::new()
                .with(Primitive::Mac, 7)
                .with(Primitive::Add, 1)
                .with(Primitive::Divide, 1),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Activation::Relu => "ReLU",
            Activation::Gelu => "GELU",
            Activation::Silu => "SiLU",
        };
        f.write_str(s)
    }
}

/// Q, K and V projections; three independent operations
pub fn qkv() -> Result<EinsumGraph> {
    let operations = vec![
        Operation::new("Q", ["B", "E", "H", "P"])
            .with_input("INPQ", ["B", "D", "P"])
            .with_input("WQ", ["D", "E", "H"])
            .with_cost(Primitive::Mac, 1),
        Operation::new("BK", ["B", "E", "H", "M", "N"])
            .with_input("INPK", ["B", "D", "M", "N"])
            .with_input("WK", ["D", "E", "H"])
            .with_cost(Primitive::Mac, 1),
        Operation::new("BV", ["B", "F", "H", "M", "N"])
            .with_input("INPV", ["B", "D", "M", "N"])
            .with_input("WV", ["D", "H", "F"])
            .with_cost(Primitive::Mac, 1),
    ];
    let none: [(&str, Vec<&str>); 0] = [];
    EinsumGraph::build(operations, none)
}

/// Streaming multi-head attention with a running-max softmax
///
/// Twelve operations: scores, local and running maxima, the two rescaled
/// exponential branches, their denominator and numerator reductions, and the
/// final division.
pub fn attention() -> Result<EinsumGraph> {
    let bhmp = ["B", "H", "M", "P"];
    let bfhmp = ["B", "F", "H", "M", "P"];
    let operations = vec![
        Operation::new("QK", ["B", "H", "M", "N", "P"])
            .with_input("Q", ["B", "E", "H", "P"])
            .with_input("BK", ["B", "E", "H", "M", "N"])
            .with_cost(Primitive::Mac, 1),
        Operation::new("LM", bhmp)
            .with_input("QK", ["B", "H", "M", "N", "P"])
            .with_cost(Primitive::Max, 1),
        Operation::new("RM", bhmp)
            .with_input("LM", bhmp)
            .with_input("RM0", bhmp)
            .with_cost(Primitive::Max, 1),
        Operation::new("SLN", ["B", "H", "M", "N", "P"])
            .with_input("QK", ["B", "H", "M", "N", "P"])
            .with_input("RM", bhmp)
            .with_cost(Primitive::Mac, 6)
            .with_cost(Primitive::Add, 1),
        Operation::new("SLD", bhmp)
            .with_input("SLN", ["B", "H", "M", "N", "P"])
            .with_cost(Primitive::Add, 1),
        Operation::new("SLNV", bfhmp)
            .with_input("BV", ["B", "F", "H", "M", "N"])
            .with_input("SLN", ["B", "H", "M", "N", "P"])
            .with_cost(Primitive::Mac, 1),
        Operation::new("PRM", bhmp)
            .with_input("RM", bhmp)
            .with_input("RM0", bhmp)
            .with_cost(Primitive::Mac, 6)
            .with_cost(Primitive::Add, 1),
        Operation::new("SPD", bhmp)
            .with_input("PRM", bhmp)
            .with_input("RD0", bhmp)
            .with_cost(Primitive::Mac, 1),
        Operation::new("RD", bhmp)
            .with_input("SLD", bhmp)
            .with_input("SPD", bhmp)
            .with_cost(Primitive::Add, 1),
        Operation::new("SPNV", bfhmp)
            .with_input("PRM", bhmp)
            .with_input("RNV0", bfhmp)
            .with_cost(Primitive::Mac, 1),
        Operation::new("RNV", bfhmp)
            .with_input("SLNV", bfhmp)
            .with_input("SPNV", bfhmp)
            .with_cost(Primitive::Add, 1),
        Operation::new("AV", ["B", "F", "H", "P"])
            .with_input("RD1", ["B", "H", "P"])
            .with_input("RNV1", ["B", "F", "H", "P"])
            .with_cost(Primitive::Divide, 1),
    ];
    EinsumGraph::build(
        operations,
        [
            ("QK", vec!["LM"]),
            ("LM", vec!["RM"]),
            ("RM", vec!["SLN", "PRM"]),
            ("SLN", vec!["SLD", "SLNV"]),
            ("SLD", vec!["RD"]),
            ("SLNV", vec!["RNV"]),
            ("PRM", vec!["SPD", "SPNV"]),
            ("SPD", vec!["RD"]),
            ("RD", vec!["AV"]),
            ("SPNV", vec!["RNV"]),
            ("RNV", vec!["AV"]),
        ],
    )
}

/// Residual add followed by layer normalisation; a nine-operation chain
pub fn add_norm() -> Result<EinsumGraph> {
    let bfhp = ["B", "F", "H", "P"];
    let bp = ["B", "P"];
    let operations = vec![
        Operation::new("IAV", bfhp)
            .with_input("INPI", bfhp)
            .with_input("AV", bfhp)
            .with_cost(Primitive::Add, 1),
        Operation::new("SAV", bp)
            .with_input("IAV", bfhp)
            .with_cost(Primitive::Add, 1),
        Operation::new("MAV", bp)
            .with_input("SAV", bp)
            .with_cost(Primitive::Mac, 1),
        Operation::new("DAV", bfhp)
            .with_input("IAV", bfhp)
            .with_input("MAV", bp)
            .with_cost(Primitive::Add, 1),
        Operation::new("QAV", bfhp)
            .with_input("DAV", bfhp)
            .with_cost(Primitive::Mac, 1),
        Operation::new("SQAV", bp)
            .with_input("QAV", bfhp)
            .with_cost(Primitive::Add, 1),
        Operation::new("MQAV", bp)
            .with_input("SQAV", bp)
            .with_cost(Primitive::Mac, 1),
        // Square root by iterated multiply-accumulate
        Operation::new("SR", bp)
            .with_input("MQAV", bp)
            .with_cost(Primitive::Mac, 6),
        Operation::new("NR", bfhp)
            .with_input("DAV", bfhp)
            .with_input("SR", bp)
            .with_cost(Primitive::Mac, 1),
    ];
    let chain = ["IAV", "SAV", "MAV", "DAV", "QAV", "SQAV", "MQAV", "SR", "NR"];
    EinsumGraph::build(
        operations,
        chain.windows(2).map(|w| (w[0], vec![w[1]])),
    )
}

/// Feed-forward block: expansion, activation, projection
pub fn feed_forward(activation: Activation) -> Result<EinsumGraph> {
    let operations = vec![
        Operation::new("FFN", ["B", "S", "P"])
            .with_input("WF", ["F", "H", "S"])
            .with_input("NR", ["B", "F", "H", "P"])
            .with_input("BF", ["S"])
            .with_cost(Primitive::Mac, 1),
        Operation::new("AR", ["B", "S", "P"])
            .with_input("FFN", ["B", "S", "P"])
            .with_compute_cost(activation.compute_cost()),
        Operation::new("FFNT", ["B", "F", "H", "P"])
            .with_input("WFT", ["F", "H", "S"])
            .with_input("AR", ["B", "S", "P"])
            .with_input("BFT", ["F", "H"])
            .with_cost(Primitive::Mac, 1),
    ];
    EinsumGraph::build(operations, [("FFN", vec!["AR"]), ("AR", vec!["FFNT"])])
}

/// One of the einsum groups a transformer layer is split into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerGroup {
    Qkv,
    Attention,
    AddNorm,
    FeedForward(Activation),
}

impl LayerGroup {
    /// Group label used in cache identities and logs
    pub fn name(&self) -> &'static str {
        match self {
            LayerGroup::Qkv => "QKV",
            LayerGroup::Attention => "MHA",
            LayerGroup::AddNorm => "LayerNorm",
            LayerGroup::FeedForward(_) => "FFN",
        }
    }

    /// The group's einsums and their dependencies
    ///
    /// # Errors
    ///
    /// Only if the built-in group definitions are malformed; every group
    /// validates.
    ///
    /// # Examples
    ///
    /// ```
    /// use fusemesh::presets::LayerGroup;
    ///
    /// let graph = LayerGroup::Attention.graph()?;
    /// assert!(graph.operation("QK").is_some());
    /// assert_eq!(graph.dependencies().sources(), vec!["QK"]);
    /// # Ok::<(), fusemesh_core::FusemeshError>(())
    /// ```
    pub fn graph(&self) -> Result<EinsumGraph> {
        let graph = match self {
            LayerGroup::Qkv => qkv(),
            LayerGroup::Attention => attention(),
            LayerGroup::AddNorm => add_norm(),
            LayerGroup::FeedForward(activation) => feed_forward(*activation),
        }?;
        tracing::debug!(group = self.name(), operations = graph.len(), "built einsum group");
        Ok(graph)
    }

    /// How the group's einsums map onto the meshes for analytic estimates
    ///
    /// Attention reductions without the inner key dimension spread over query
    /// rows only; add-and-norm reductions over `B, P` fill one mesh row.
    pub fn estimate_model(&self) -> EstimateModel {
        match self {
            LayerGroup::Attention => EstimateModel::attention(),
            LayerGroup::AddNorm => EstimateModel::Normalization,
            LayerGroup::Qkv | LayerGroup::FeedForward(_) => EstimateModel::Uniform,
        }
    }

    /// Default scheduler settings; attention keeps its two running reductions ordered
    pub fn scheduler_config(&self) -> SchedulerConfig {
        match self {
            LayerGroup::Attention => SchedulerConfig::default()
                .with_preserved_edge("SPD", "RD")
                .with_preserved_edge("SPNV", "RNV"),
            _ => SchedulerConfig::default(),
        }
    }
}

/// How layers of a model family stack up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerStack {
    Encoder,
    Decoder,
    EncoderDecoder,
}

impl LayerStack {
    /// Stack of a named model family, `None` for unknown names
    pub fn for_model(model: &str) -> Option<Self> {
        match model {
            "BERT" => Some(LayerStack::Encoder),
            "TrXL" | "Llama3" => Some(LayerStack::Decoder),
            "T5" | "XLM" => Some(LayerStack::EncoderDecoder),
            _ => None,
        }
    }

    /// Combine per-group totals (latency or energy) into one layer total
    ///
    /// An encoder runs add-and-norm after both attention and feed-forward; a
    /// decoder runs attention twice (self and cross).
    pub fn combine(&self, qkv: f64, attention: f64, add_norm: f64, feed_forward: f64) -> f64 {
        let encoder = qkv + attention + add_norm + feed_forward + add_norm;
        let decoder = qkv + (attention + add_norm) * 2.0 + (feed_forward + add_norm);
        match self {
            LayerStack::Encoder => encoder,
            LayerStack::Decoder => decoder,
            LayerStack::EncoderDecoder => encoder + decoder,
        }
    }
}

/// Problem size of one layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerShape {
    /// Batch size (`B`)
    pub batch: u64,
    /// Model embedding width (`D`)
    pub model_width: u64,
    /// Per-head key width (`E`)
    pub key_width: u64,
    /// Per-head value width (`F`)
    pub value_width: u64,
    /// Attention heads (`H`)
    pub heads: u64,
    /// Key sequence length, split into `M × N`
    pub key_len: u64,
    /// Query sequence length (`P`)
    pub query_len: u64,
    /// Feed-forward hidden width (`S`)
    pub hidden_width: u64,
}

impl LayerShape {
    /// Extents with the key sequence split into `M` rows of `N = mesh_2d` elements
    ///
    /// # Errors
    ///
    /// [`FusemeshError::InvalidFactors`] when `mesh_2d` is zero or does not
    /// divide the key sequence length.
    pub fn extents(&self, mesh_2d: u64) -> Result<Extents> {
        if mesh_2d == 0 || self.key_len % mesh_2d != 0 {
            return Err(FusemeshError::invalid_factors(format!(
                "key length {} is not a multiple of the 2D mesh width {}",
                self.key_len, mesh_2d
            )));
        }
        let extents = [
            ("B", self.batch),
            ("D", self.model_width),
            ("E", self.key_width),
            ("F", self.value_width),
            ("H", self.heads),
            ("M", self.key_len / mesh_2d),
            ("N", mesh_2d),
            ("P", self.query_len),
            ("S", self.hidden_width),
        ];
        Ok(extents
            .into_iter()
            .map(|(d, v)| (d.to_string(), v))
            .collect())
    }
}
