/// Numeric data handed from a transformer to an estimator.
///
/// `elements` holds magnitudes for spectral buffers and raw samples for
/// time-domain buffers. The split components are only present when the
/// transform was asked to keep them.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    elements: Vec<f32>,
    components: Option<(Vec<f32>, Vec<f32>)>,
}

impl Buffer {
    pub fn new(elements: Vec<f32>) -> Self {
        Self {
            elements,
            components: None,
        }
    }

    /// Both component vectors must match `elements` in length; otherwise they
    /// are dropped and the buffer carries magnitudes only.
    pub fn with_components(elements: Vec<f32>, real: Vec<f32>, imag: Vec<f32>) -> Self {
        let components = if real.len() == elements.len() && imag.len() == elements.len() {
            Some((real, imag))
        } else {
            None
        };

        Self {
            elements,
            components,
        }
    }

    pub fn elements(&self) -> &[f32] {
        &self.elements
    }

    pub fn real_elements(&self) -> Option<&[f32]> {
        self.components.as_ref().map(|(re, _)| re.as_slice())
    }

    pub fn imag_elements(&self) -> Option<&[f32]> {
        self.components.as_ref().map(|(_, im)| im.as_slice())
    }

    pub fn count(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_count() {
        let buffer = Buffer::new(vec![0.1, 0.2, 0.3]);
        assert_eq!(buffer.count(), 3);
        assert!(buffer.real_elements().is_none());
    }

    #[test]
    fn test_mismatched_components_are_dropped() {
        let buffer = Buffer::with_components(vec![1.0, 2.0], vec![1.0], vec![0.0, 0.0]);
        assert!(buffer.real_elements().is_none());
        assert!(buffer.imag_elements().is_none());

        let buffer = Buffer::with_components(vec![1.0, 2.0], vec![1.0, 2.0], vec![0.0, 0.0]);
        assert_eq!(buffer.real_elements(), Some(&[1.0, 2.0][..]));
        assert_eq!(buffer.imag_elements(), Some(&[0.0, 0.0][..]));
    }
}
