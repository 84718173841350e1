use crate::traffic::config::TrafficPatternSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOp {
    Read,
    Write,
    /// Alternate read and write request by request.
    ReadWrite,
}

#[derive(Debug, Clone, Copy)]
enum PatternKind {
    Strided { stride: u64 },
    Random { seed: u64 },
}

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub name: String,
    pub op: PatternOp,
    kind: PatternKind,
}

impl CompiledPattern {
    /// Word-aligned byte offset of request `req_idx` inside the window.
    pub fn offset(&self, req_idx: u32, window_bytes: u32) -> u32 {
        let window = u64::from(window_bytes.max(4));
        let raw = match self.kind {
            PatternKind::Strided { stride } => u64::from(req_idx) * stride,
            PatternKind::Random { seed } => mix64(seed ^ u64::from(req_idx)),
        };
        ((raw % window) as u32) & !3
    }

    pub fn is_write(&self, req_idx: u32) -> bool {
        match self.op {
            PatternOp::Read => false,
            PatternOp::Write => true,
            PatternOp::ReadWrite => req_idx % 2 == 1,
        }
    }
}

pub fn compile_pattern(spec: &TrafficPatternSpec, index: usize) -> CompiledPattern {
    let kind = match spec.kind.trim().to_ascii_lowercase().as_str() {
        "strided" => PatternKind::Strided {
            stride: u64::from(spec.stride.max(1)),
        },
        "random" => PatternKind::Random { seed: spec.seed },
        other => panic!(
            "unsupported traffic pattern kind '{}' at index {} (expected strided|random)",
            other, index
        ),
    };
    let op = match spec.op.trim().to_ascii_lowercase().as_str() {
        "read" | "r" => PatternOp::Read,
        "write" | "w" => PatternOp::Write,
        "rw" | "readwrite" => PatternOp::ReadWrite,
        other => panic!("unsupported traffic op '{}'; expected read/write/rw", other),
    };
    let name = if spec.name.is_empty() {
        format!("pattern{}_{}", index, spec.kind)
    } else {
        spec.name.clone()
    };
    CompiledPattern { name, op, kind }
}

pub fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::config::TrafficPatternSpec;

    fn spec(kind: &str, op: &str, stride: u32) -> TrafficPatternSpec {
        TrafficPatternSpec {
            kind: kind.to_string(),
            op: op.to_string(),
            stride,
            ..TrafficPatternSpec::default()
        }
    }

    #[test]
    fn strided_offsets_wrap_in_window() {
        let p = compile_pattern(&spec("strided", "read", 64), 0);
        assert_eq!(p.offset(0, 256), 0);
        assert_eq!(p.offset(1, 256), 64);
        assert_eq!(p.offset(4, 256), 0);
    }

    #[test]
    fn random_offsets_are_deterministic_and_aligned() {
        let p = compile_pattern(&spec("random", "read", 4), 0);
        for req in 0..100 {
            let a = p.offset(req, 1 << 16);
            assert_eq!(a, p.offset(req, 1 << 16));
            assert_eq!(a % 4, 0);
            assert!(a < (1 << 16));
        }
    }

    #[test]
    fn rw_pattern_alternates() {
        let p = compile_pattern(&spec("strided", "rw", 4), 0);
        assert!(!p.is_write(0));
        assert!(p.is_write(1));
        assert!(!p.is_write(2));
    }

    #[test]
    #[should_panic(expected = "unsupported traffic pattern kind")]
    fn unknown_kind_panics() {
        compile_pattern(&spec("tiled", "read", 4), 3);
    }
}
