//! Inverse multi-component transforms (Annex G) and the final DC level
//! shift of reconstructed samples.

use super::image::J2kComponentInfo;
use crate::error::J2kError;

/// Reconstructed samples of one tile-component, before level shift.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentSamples {
    /// Output of the 5-3 synthesis.
    Integer(Vec<i32>),
    /// Output of the 9-7 synthesis.
    Float(Vec<f32>),
}

impl ComponentSamples {
    pub fn len(&self) -> usize {
        match self {
            ComponentSamples::Integer(v) => v.len(),
            ComponentSamples::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_integer(self) -> Vec<i32> {
        match self {
            ComponentSamples::Integer(v) => v,
            ComponentSamples::Float(v) => v.into_iter().map(|x| x.round() as i32).collect(),
        }
    }

    fn into_float(self) -> Vec<f32> {
        match self {
            ComponentSamples::Integer(v) => v.into_iter().map(|x| x as f32).collect(),
            ComponentSamples::Float(v) => v,
        }
    }
}

/// G.2: reversible component transform, in place.
pub fn inverse_rct(y0: &mut [i32], y1: &mut [i32], y2: &mut [i32]) {
    for ((a, b), c) in y0.iter_mut().zip(y1.iter_mut()).zip(y2.iter_mut()) {
        let (l, cb, cr) = (*a as i64, *b as i64, *c as i64);
        let g = l - ((cr + cb) >> 2);
        *a = (g + cr) as i32;
        *b = g as i32;
        *c = (g + cb) as i32;
    }
}

/// G.3: irreversible component transform, in place.
pub fn inverse_ict(y0: &mut [f32], y1: &mut [f32], y2: &mut [f32]) {
    for ((a, b), c) in y0.iter_mut().zip(y1.iter_mut()).zip(y2.iter_mut()) {
        let (l, cb, cr) = (*a, *b, *c);
        *a = l + 1.402 * cr;
        *b = l - 0.34413 * cb - 0.71414 * cr;
        *c = l + 1.772 * cb;
    }
}

/// Applies the inverse transform selected by `reversible` to the first three
/// components. Further components are left untouched.
pub fn apply_inverse(
    components: &mut [ComponentSamples],
    reversible: bool,
) -> Result<(), J2kError> {
    if components.len() < 3 {
        return Err(J2kError::InvalidData(format!(
            "Component transform needs 3 components, found {}",
            components.len()
        )));
    }
    let len = components[0].len();
    if components[1].len() != len || components[2].len() != len {
        return Err(J2kError::UnsupportedFeature(
            "component transform on subsampled components".to_string(),
        ));
    }

    let mut take =
        |i: usize| std::mem::replace(&mut components[i], ComponentSamples::Integer(Vec::new()));
    let (c0, c1, c2) = (take(0), take(1), take(2));

    if reversible {
        let (mut y0, mut y1, mut y2) = (c0.into_integer(), c1.into_integer(), c2.into_integer());
        inverse_rct(&mut y0, &mut y1, &mut y2);
        components[0] = ComponentSamples::Integer(y0);
        components[1] = ComponentSamples::Integer(y1);
        components[2] = ComponentSamples::Integer(y2);
    } else {
        let (mut y0, mut y1, mut y2) = (c0.into_float(), c1.into_float(), c2.into_float());
        inverse_ict(&mut y0, &mut y1, &mut y2);
        components[0] = ComponentSamples::Float(y0);
        components[1] = ComponentSamples::Float(y1);
        components[2] = ComponentSamples::Float(y2);
    }
    Ok(())
}

/// G.1.2: undoes the DC level shift of unsigned components and clamps to the
/// component's sample range.
pub fn level_shift(samples: ComponentSamples, info: &J2kComponentInfo) -> Vec<i32> {
    let depth = info.depth.min(31) as u32;
    let (offset, min, max) = if info.is_signed {
        let half = 1i64 << (depth - 1);
        (0, -half, half - 1)
    } else {
        (1i64 << (depth - 1), 0, (1i64 << depth) - 1)
    };
    match samples {
        ComponentSamples::Integer(v) => v
            .into_iter()
            .map(|x| (x as i64 + offset).clamp(min, max) as i32)
            .collect(),
        ComponentSamples::Float(v) => v
            .into_iter()
            .map(|x| ((x as f64 + offset as f64 + 0.5).floor() as i64).clamp(min, max) as i32)
            .collect(),
    }
}
