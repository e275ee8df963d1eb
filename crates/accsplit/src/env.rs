use std::env;
use std::sync::OnceLock;

static MIN_ACC_MODULE_SIZE: OnceLock<Option<usize>> = OnceLock::new();
static SKIP_FUSION: OnceLock<Option<bool>> = OnceLock::new();
static ALLOW_NON_TENSOR: OnceLock<Option<bool>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn read_bool(name: &str) -> Option<bool> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(parse_bool(&value)),
        _ => None,
    }
}

fn read_usize(name: &str) -> Option<usize> {
    let value = env::var(name).ok()?;
    match value.trim().parse::<usize>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("ignoring {name}={value:?}: expected a non-negative integer");
            None
        }
    }
}

pub(crate) fn min_acc_module_size() -> Option<usize> {
    *MIN_ACC_MODULE_SIZE.get_or_init(|| read_usize("ACCSPLIT_MIN_ACC_MODULE_SIZE"))
}

pub(crate) fn skip_fusion() -> Option<bool> {
    *SKIP_FUSION.get_or_init(|| read_bool("ACCSPLIT_SKIP_FUSION"))
}

pub(crate) fn allow_non_tensor() -> Option<bool> {
    *ALLOW_NON_TENSOR.get_or_init(|| read_bool("ACCSPLIT_ALLOW_NON_TENSOR"))
}
