use std::str::FromStr;

use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};

use super::FecError;

/// Systematic erasure code over equal-size shards.
///
/// Shard vectors passed to `reconstruct` hold the data shards followed by the
/// parity shards, with `None` for every shard that never arrived.
pub trait ErasureCodec: Send + Sync {
    fn name(&self) -> &'static str;

    fn max_parity_shards(&self) -> usize;

    fn encode(&self, data: &[Vec<u8>], parity_count: usize) -> Result<Vec<Vec<u8>>, FecError>;

    fn reconstruct(&self, shards: &mut [Option<Vec<u8>>], data_count: usize) -> Result<(), FecError>;
}

fn check_parity(codec: &dyn ErasureCodec, parity_count: usize) -> Result<(), FecError> {
    if parity_count > codec.max_parity_shards() {
        return Err(FecError::Unsupported(format!(
            "{} codec cannot produce {parity_count} parity shards",
            codec.name()
        )));
    }
    Ok(())
}

fn check_present(shards: &[Option<Vec<u8>>], data_count: usize) -> Result<(), FecError> {
    let present = shards.iter().filter(|s| s.is_some()).count();
    if present < data_count {
        return Err(FecError::ReconstructionFailed {
            present,
            required: data_count,
        });
    }
    Ok(())
}

/// No redundancy: every data shard has to arrive.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodec;

impl ErasureCodec for PassthroughCodec {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn max_parity_shards(&self) -> usize {
        0
    }

    fn encode(&self, _data: &[Vec<u8>], parity_count: usize) -> Result<Vec<Vec<u8>>, FecError> {
        check_parity(self, parity_count)?;
        Ok(Vec::new())
    }

    fn reconstruct(&self, shards: &mut [Option<Vec<u8>>], data_count: usize) -> Result<(), FecError> {
        let present = shards[..data_count.min(shards.len())].iter().filter(|s| s.is_some()).count();
        if present < data_count {
            return Err(FecError::ReconstructionFailed {
                present,
                required: data_count,
            });
        }
        Ok(())
    }
}

/// Single parity shard holding the XOR of all data shards. Recovers any one
/// missing shard.
#[derive(Debug, Clone, Copy, Default)]
pub struct XorParityCodec;

impl ErasureCodec for XorParityCodec {
    fn name(&self) -> &'static str {
        "xor-parity"
    }

    fn max_parity_shards(&self) -> usize {
        1
    }

    fn encode(&self, data: &[Vec<u8>], parity_count: usize) -> Result<Vec<Vec<u8>>, FecError> {
        check_parity(self, parity_count)?;
        if parity_count == 0 {
            return Ok(Vec::new());
        }

        let size = data.first().map_or(0, Vec::len);
        let mut parity = vec![0u8; size];
        for shard in data {
            if shard.len() != size {
                return Err(FecError::ShardSizeMismatch {
                    expected: size,
                    actual: shard.len(),
                });
            }
            xor_into(&mut parity, shard);
        }
        Ok(vec![parity])
    }

    fn reconstruct(&self, shards: &mut [Option<Vec<u8>>], data_count: usize) -> Result<(), FecError> {
        check_present(shards, data_count)?;

        let Some(missing) = shards[..data_count].iter().position(Option::is_none) else {
            return Ok(());
        };

        let size = shards.iter().flatten().map(Vec::len).next().unwrap_or(0);
        let mut recovered = vec![0u8; size];
        for shard in shards.iter().flatten() {
            if shard.len() != size {
                return Err(FecError::ShardSizeMismatch {
                    expected: size,
                    actual: shard.len(),
                });
            }
            xor_into(&mut recovered, shard);
        }
        shards[missing] = Some(recovered);
        Ok(())
    }
}

/// Reed-Solomon over GF(2^8). Recovers up to `parity_count` missing shards
/// out of at most 256 in total.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReedSolomonCodec;

const REED_SOLOMON_MAX_SHARDS: usize = 256;

impl ErasureCodec for ReedSolomonCodec {
    fn name(&self) -> &'static str {
        "reed-solomon"
    }

    fn max_parity_shards(&self) -> usize {
        REED_SOLOMON_MAX_SHARDS - 1
    }

    fn encode(&self, data: &[Vec<u8>], parity_count: usize) -> Result<Vec<Vec<u8>>, FecError> {
        check_parity(self, parity_count)?;
        if parity_count == 0 || data.is_empty() {
            return Ok(Vec::new());
        }

        let size = data[0].len();
        if let Some(shard) = data.iter().find(|shard| shard.len() != size) {
            return Err(FecError::ShardSizeMismatch {
                expected: size,
                actual: shard.len(),
            });
        }

        let mut parity = vec![vec![0u8; size]; parity_count];
        if size > 0 {
            let rs = ReedSolomon::new(data.len(), parity_count)?;
            rs.encode_sep(data, &mut parity)?;
        }
        Ok(parity)
    }

    fn reconstruct(&self, shards: &mut [Option<Vec<u8>>], data_count: usize) -> Result<(), FecError> {
        check_present(shards, data_count)?;
        if shards[..data_count].iter().all(Option::is_some) {
            return Ok(());
        }

        if shards.iter().flatten().all(Vec::is_empty) {
            for shard in &mut shards[..data_count] {
                shard.get_or_insert_with(Vec::new);
            }
            return Ok(());
        }

        let rs = ReedSolomon::new(data_count, shards.len() - data_count)?;
        rs.reconstruct_data(shards)?;
        Ok(())
    }
}

fn xor_into(target: &mut [u8], source: &[u8]) {
    for (t, s) in target.iter_mut().zip(source) {
        *t ^= s;
    }
}

/// Erasure codecs available to the binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodecKind {
    None,
    #[default]
    XorParity,
    ReedSolomon,
}

impl FromStr for CodecKind {
    type Err = FecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CodecKind::None),
            "xor-parity" => Ok(CodecKind::XorParity),
            "reed-solomon" => Ok(CodecKind::ReedSolomon),
            other => Err(FecError::Unsupported(format!("unknown codec '{other}'"))),
        }
    }
}

impl CodecKind {
    pub fn build(self) -> Box<dyn ErasureCodec> {
        match self {
            CodecKind::None => Box::new(PassthroughCodec),
            CodecKind::XorParity => Box::new(XorParityCodec),
            CodecKind::ReedSolomon => Box::new(ReedSolomonCodec),
        }
    }

    /// Builds the codec and checks it can produce `parity_count` shards.
    pub fn build_for(self, parity_count: usize) -> Result<Box<dyn ErasureCodec>, FecError> {
        let codec = self.build();
        check_parity(codec.as_ref(), parity_count)?;
        Ok(codec)
    }
}
