//! Orientation handling: the 8 rotations/mirrorings of an image.
//!
//! An [`Orientation`] mirrors first (left to right) and then rotates
//! counter-clockwise by a number of quarter turns. Applied to a raster it
//! moves pixels; applied to a signature it permutes lattice points and
//! remaps neighbour directions, which yields exactly the signature the
//! generator would produce for the oriented raster.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, SignatureConfig};
use crate::error::{Error, Result};
use crate::raster::GrayImage;
use crate::signature::{Signature, DIRECTIONS};

/// Element of the dihedral group of the square.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    Identity,
    Rot90,
    Rot180,
    Rot270,
    Mirror,
    MirrorRot90,
    MirrorRot180,
    MirrorRot270,
}

impl Orientation {
    pub const ALL: [Orientation; 8] = [
        Orientation::Identity,
        Orientation::Rot90,
        Orientation::Rot180,
        Orientation::Rot270,
        Orientation::Mirror,
        Orientation::MirrorRot90,
        Orientation::MirrorRot180,
        Orientation::MirrorRot270,
    ];

    pub fn from_parts(mirrored: bool, quarter_turns: u8) -> Self {
        match (mirrored, quarter_turns % 4) {
            (false, 0) => Orientation::Identity,
            (false, 1) => Orientation::Rot90,
            (false, 2) => Orientation::Rot180,
            (false, _) => Orientation::Rot270,
            (true, 0) => Orientation::Mirror,
            (true, 1) => Orientation::MirrorRot90,
            (true, 2) => Orientation::MirrorRot180,
            (true, _) => Orientation::MirrorRot270,
        }
    }

    pub fn is_mirrored(self) -> bool {
        matches!(
            self,
            Orientation::Mirror
                | Orientation::MirrorRot90
                | Orientation::MirrorRot180
                | Orientation::MirrorRot270
        )
    }

    /// Counter-clockwise quarter turns applied after the optional mirror.
    pub fn quarter_turns(self) -> u8 {
        match self {
            Orientation::Identity | Orientation::Mirror => 0,
            Orientation::Rot90 | Orientation::MirrorRot90 => 1,
            Orientation::Rot180 | Orientation::MirrorRot180 => 2,
            Orientation::Rot270 | Orientation::MirrorRot270 => 3,
        }
    }

    /// Apply `self`, then `next`.
    pub fn then(self, next: Orientation) -> Orientation {
        let (ma, ka) = (self.is_mirrored(), self.quarter_turns());
        let (mb, kb) = (next.is_mirrored(), next.quarter_turns());
        if mb {
            // A mirror reverses the sense of the rotations already applied.
            Orientation::from_parts(!ma, (kb + 4 - ka) % 4)
        } else {
            Orientation::from_parts(ma, (kb + ka) % 4)
        }
    }

    pub fn inverse(self) -> Orientation {
        if self.is_mirrored() {
            self
        } else {
            Orientation::from_parts(false, (4 - self.quarter_turns()) % 4)
        }
    }

    pub fn apply_to_image(self, image: &GrayImage) -> GrayImage {
        let mut out = if self.is_mirrored() {
            image.flip_horizontal()
        } else {
            image.clone()
        };
        for _ in 0..self.quarter_turns() {
            out = out.rotate90();
        }
        out
    }

    /// Where lattice point `(row, col)` of an `n x n` grid ends up.
    fn map_point(self, (r, c): (i32, i32), n: i32) -> (i32, i32) {
        let (mut r, mut c) = if self.is_mirrored() {
            (r, n - 1 - c)
        } else {
            (r, c)
        };
        for _ in 0..self.quarter_turns() {
            (r, c) = (n - 1 - c, r);
        }
        (r, c)
    }

    fn map_vector(self, (dr, dc): (i32, i32)) -> (i32, i32) {
        let (mut dr, mut dc) = if self.is_mirrored() {
            (dr, -dc)
        } else {
            (dr, dc)
        };
        for _ in 0..self.quarter_turns() {
            (dr, dc) = (-dc, dr);
        }
        (dr, dc)
    }

    /// `table[new_index] = old_index` for a signature laid out as
    /// `grid_size x grid_size` points by `directions` comparisons.
    fn permutation(self, grid_size: usize, directions: usize) -> Vec<usize> {
        let n = grid_size as i32;
        let inverse = self.inverse();
        let dirs = &DIRECTIONS[..directions];
        let mut table = Vec::with_capacity(grid_size * grid_size * directions);

        for r in 0..n {
            for c in 0..n {
                let (or, oc) = inverse.map_point((r, c), n);
                for &d in dirs {
                    let od = inverse.map_vector(d);
                    // Rotations and mirrors map the direction set onto itself.
                    let od_index = dirs.iter().position(|&x| x == od).unwrap_or(0);
                    table.push(((or * n + oc) as usize) * directions + od_index);
                }
            }
        }
        table
    }
}

/// An orientation, optionally combined with intensity inversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrientedVariant {
    pub orientation: Orientation,
    pub inverted: bool,
}

impl OrientedVariant {
    pub const IDENTITY: OrientedVariant = OrientedVariant {
        orientation: Orientation::Identity,
        inverted: false,
    };

    pub fn inverse(self) -> OrientedVariant {
        OrientedVariant {
            orientation: self.orientation.inverse(),
            inverted: self.inverted,
        }
    }
}

/// Derives oriented variants of rasters and signatures.
#[derive(Clone, Debug)]
pub struct OrientationExpander {
    grid_size: usize,
    directions: usize,
    include_inversions: bool,
    // Indexed like `Orientation::ALL`.
    permutations: Vec<Vec<usize>>,
}

impl OrientationExpander {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_signature_config(&config.signature, config.include_inversions)
    }

    pub fn with_signature_config(config: &SignatureConfig, include_inversions: bool) -> Self {
        let directions = config.directions();
        let permutations = Orientation::ALL
            .iter()
            .map(|o| o.permutation(config.grid_size, directions))
            .collect();
        Self {
            grid_size: config.grid_size,
            directions,
            include_inversions,
            permutations,
        }
    }

    /// Every variant this expander produces, identity first.
    pub fn variants(&self) -> Vec<OrientedVariant> {
        let inversions: &[bool] = if self.include_inversions {
            &[false, true]
        } else {
            &[false]
        };
        inversions
            .iter()
            .flat_map(|&inverted| {
                Orientation::ALL.iter().map(move |&orientation| OrientedVariant {
                    orientation,
                    inverted,
                })
            })
            .collect()
    }

    /// All oriented rasters of `image`, for write-time expansion.
    pub fn expand(&self, image: &GrayImage) -> Vec<(OrientedVariant, GrayImage)> {
        self.variants()
            .into_iter()
            .map(|variant| {
                let oriented = variant.orientation.apply_to_image(image);
                let oriented = if variant.inverted {
                    oriented.invert()
                } else {
                    oriented
                };
                (variant, oriented)
            })
            .collect()
    }

    /// Distinct oriented signatures of `signature`, identity first.
    ///
    /// Symmetric images produce repeated signatures; only the first variant
    /// producing each distinct signature is kept.
    pub fn expand_query(&self, signature: &Signature) -> Result<Vec<(OrientedVariant, Signature)>> {
        let mut seen: HashSet<Vec<i8>> = HashSet::new();
        let mut out = Vec::new();
        for variant in self.variants() {
            let oriented = self.apply(signature, variant)?;
            if seen.insert(oriented.values().to_vec()) {
                out.push((variant, oriented));
            }
        }
        Ok(out)
    }

    /// Signature of the variant of the image `signature` was generated from.
    pub fn apply(&self, signature: &Signature, variant: OrientedVariant) -> Result<Signature> {
        let expected = self.grid_size * self.grid_size * self.directions;
        if signature.len() != expected {
            return Err(Error::ConfigurationMismatch {
                expected: format!("signature length {expected}"),
                found: format!("signature length {}", signature.len()),
            });
        }
        let index = Orientation::ALL
            .iter()
            .position(|&o| o == variant.orientation)
            .unwrap_or(0);
        let table = &self.permutations[index];
        let values = signature.values();
        let permuted: Vec<i8> = table
            .iter()
            .map(|&old| if variant.inverted { -values[old] } else { values[old] })
            .collect();
        Ok(signature.with_values(permuted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureGenerator;

    fn textured() -> GrayImage {
        GrayImage::from_fn(97, 61, |x, y| {
            let v = (x * x + 3 * y * y + 7 * x * y) % 251;
            v as u8
        })
        .unwrap()
    }

    #[test]
    fn composition_matches_raster_operations() {
        let img = textured();
        for a in Orientation::ALL {
            for b in Orientation::ALL {
                let step = b.apply_to_image(&a.apply_to_image(&img));
                let composed = a.then(b).apply_to_image(&img);
                assert_eq!(step, composed, "{a:?} then {b:?}");
            }
        }
    }

    #[test]
    fn inverse_undoes_orientation() {
        let img = textured();
        for o in Orientation::ALL {
            assert_eq!(o.then(o.inverse()), Orientation::Identity);
            assert_eq!(o.inverse().apply_to_image(&o.apply_to_image(&img)), img);
        }
    }

    #[test]
    fn oriented_raster_signature_equals_oriented_signature() {
        let config = EngineConfig::default();
        let generator = SignatureGenerator::new(&config).unwrap();
        let expander = OrientationExpander::new(&config);
        let img = textured();
        let base = generator.generate(&img, Orientation::Identity).unwrap();

        for o in Orientation::ALL {
            let from_raster = generator.generate(&img, o).unwrap();
            let variant = OrientedVariant {
                orientation: o,
                inverted: false,
            };
            let from_signature = expander.apply(&base, variant).unwrap();
            assert_eq!(from_raster, from_signature, "{o:?}");
        }
    }

    #[test]
    fn four_quarter_turns_restore_signature() {
        let config = EngineConfig::default();
        let generator = SignatureGenerator::new(&config).unwrap();
        let expander = OrientationExpander::new(&config);
        let base = generator.generate(&textured(), Orientation::Identity).unwrap();

        let rot = OrientedVariant {
            orientation: Orientation::Rot90,
            inverted: false,
        };
        let mut sig = base.clone();
        for _ in 0..4 {
            sig = expander.apply(&sig, rot).unwrap();
        }
        assert_eq!(sig, base);
    }

    #[test]
    fn inversion_negates_signature() {
        let mut config = EngineConfig::default();
        config.include_inversions = true;
        let generator = SignatureGenerator::new(&config).unwrap();
        let expander = OrientationExpander::new(&config);
        assert_eq!(expander.variants().len(), 16);

        let base = generator.generate(&textured(), Orientation::Identity).unwrap();
        let inverted = expander
            .apply(
                &base,
                OrientedVariant {
                    orientation: Orientation::Identity,
                    inverted: true,
                },
            )
            .unwrap();
        assert_eq!(inverted, base.negated());
    }

    #[test]
    fn symmetric_image_collapses_variants() {
        let config = EngineConfig::default();
        let generator = SignatureGenerator::new(&config).unwrap();
        let expander = OrientationExpander::new(&config);
        let uniform = GrayImage::from_luma8(50, 50, vec![9; 2500]).unwrap();
        let sig = generator.generate(&uniform, Orientation::Identity).unwrap();
        let variants = expander.expand_query(&sig).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].0, OrientedVariant::IDENTITY);
    }

    #[test]
    fn expand_yields_eight_rasters() {
        let expander = OrientationExpander::new(&EngineConfig::default());
        let rasters = expander.expand(&textured());
        assert_eq!(rasters.len(), 8);
        assert_eq!(rasters[0].1, textured());
        // Odd quarter turns swap the axes.
        assert_eq!(rasters[1].1.width(), 61);
    }

    #[test]
    fn wrong_length_is_a_mismatch() {
        let expander = OrientationExpander::new(&EngineConfig::default());
        let sig = Signature::from_parts(EngineConfig::default().config_id(), vec![0; 10]);
        assert!(matches!(
            expander.apply(&sig, OrientedVariant::IDENTITY),
            Err(Error::ConfigurationMismatch { .. })
        ));
    }
}
