use crate::error::IndexError;
use crate::traits::{Neighbor, VectorIndex};
use std::io::{Read, Write};

const MAGIC: &[u8; 4] = b"PRIX";
const FORMAT_VERSION: u32 = 1;

/// Exact nearest-neighbour index over squared euclidean distance. Vectors
/// are stored row-major in one contiguous buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimensions: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            data: Vec::new(),
        }
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        self.data.get(start..start + self.dimensions)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), IndexError> {
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.dimensions as u32).to_le_bytes())?;
        writer.write_all(&(self.len() as u64).to_le_bytes())?;
        for value in &self.data {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, IndexError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(IndexError::Corrupt("bad magic bytes".to_string()));
        }

        let mut word = [0u8; 4];
        reader.read_exact(&mut word)?;
        let version = u32::from_le_bytes(word);
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!("unsupported format version {version}")));
        }
        reader.read_exact(&mut word)?;
        let dimensions = u32::from_le_bytes(word) as usize;

        let mut long = [0u8; 8];
        reader.read_exact(&mut long)?;
        let count = u64::from_le_bytes(long) as usize;

        let expected_bytes = count
            .checked_mul(dimensions)
            .and_then(|total| total.checked_mul(4))
            .ok_or_else(|| IndexError::Corrupt("vector count overflows".to_string()))?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        if bytes.len() != expected_bytes {
            return Err(IndexError::Corrupt(format!(
                "expected {} vector bytes, found {}",
                expected_bytes,
                bytes.len()
            )));
        }

        let data = bytes
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect();
        Ok(Self { dimensions, data })
    }
}

pub fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let delta = a - b;
            delta * delta
        })
        .sum()
}

impl VectorIndex for FlatIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != self.dimensions) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                found: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dimensions);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query_vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                found: query_vector.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut neighbors = self
            .data
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(position, vector)| Neighbor {
                position,
                distance: squared_l2(query_vector, vector),
            })
            .collect::<Vec<_>>();

        neighbors.sort_by(|left, right| {
            left.distance
                .total_cmp(&right.distance)
                .then(left.position.cmp(&right.position))
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }
}
