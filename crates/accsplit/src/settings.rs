use serde::{Deserialize, Serialize};

/// Knobs that shape how a graph is split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterSettings {
    /// Accelerator subgraphs with fewer nodes are folded into neighbouring host subgraphs.
    pub min_acc_module_size: usize,
    /// Disables fusion groups. Fusion groups keep non-tensor values from crossing subgraph
    /// boundaries; backends without that restriction can skip them to save overhead.
    pub skip_fusion: bool,
    /// Lets non-tensor values flow between accelerator and host subgraphs. When false, an
    /// eligible node exchanging non-tensor values with host nodes is moved to the host.
    pub allow_non_tensor: bool,
}

impl Default for SplitterSettings {
    fn default() -> Self {
        Self {
            min_acc_module_size: 1,
            skip_fusion: false,
            allow_non_tensor: false,
        }
    }
}

impl SplitterSettings {
    /// Defaults overlaid with `ACCSPLIT_MIN_ACC_MODULE_SIZE`, `ACCSPLIT_SKIP_FUSION` and
    /// `ACCSPLIT_ALLOW_NON_TENSOR`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(size) = crate::env::min_acc_module_size() {
            settings.min_acc_module_size = size;
        }
        if let Some(skip) = crate::env::skip_fusion() {
            settings.skip_fusion = skip;
        }
        if let Some(allow) = crate::env::allow_non_tensor() {
            settings.allow_non_tensor = allow;
        }
        settings
    }

    pub fn from_json(src: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(src)
    }

    pub fn with_min_acc_module_size(mut self, size: usize) -> Self {
        self.min_acc_module_size = size;
        self
    }

    pub fn with_skip_fusion(mut self, skip: bool) -> Self {
        self.skip_fusion = skip;
        self
    }

    pub fn with_allow_non_tensor(mut self, allow: bool) -> Self {
        self.allow_non_tensor = allow;
        self
    }
}
