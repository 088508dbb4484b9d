use crate::embed::Embedding;

/// Divide a vector by its L2 norm.
///
/// A zero vector has no direction; the result is all NaN.
pub fn l2_normalize(embedding: &Embedding) -> Embedding {
    let norm = embedding.dot(embedding).sqrt();
    embedding / norm
}

/// Euclidean distance between the L2-normalized forms of `a` and `b`.
///
/// Ranges over [0, 2]. NaN if either vector is all zeros or the lengths
/// differ; NaN never passes a distance threshold.
pub fn compare(a: &Embedding, b: &Embedding) -> f32 {
    if a.len() != b.len() {
        return f32::NAN;
    }
    let diff = l2_normalize(a) - l2_normalize(b);
    diff.dot(&diff).sqrt()
}

/// Thresholds applied to every identity during a recognition pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    /// A model passes if its distance is strictly below this
    pub max_distance: f32,
    /// Passing models required, capped at the identity's model count
    pub min_match_count: usize,
    /// When above zero, replaces the count rule: the passing ratio must exceed it
    pub min_model_ratio: f32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            max_distance: 0.7,
            min_match_count: 1,
            min_model_ratio: 0.0,
        }
    }
}

/// Outcome of comparing one query against all models of one identity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelVote {
    pub matched: bool,
    /// Smallest passing distance, +inf if nothing passed
    pub best_distance: f32,
    /// Number of models that passed
    pub model_count: usize,
    /// `model_count` over the number of models
    pub model_ratio: f32,
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingMatcher {
    thresholds: MatchThresholds,
}

impl EmbeddingMatcher {
    pub fn new(thresholds: MatchThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &MatchThresholds {
        &self.thresholds
    }

    /// Vote `models` of one identity against `query`.
    ///
    /// In count mode the identity only matches if its best distance also
    /// beats `best_so_far`, the best distance already accepted in this pass.
    /// Ratio mode ignores `best_so_far`. Returns `None` for an empty model
    /// list.
    pub fn evaluate(
        &self,
        query: &Embedding,
        models: &[Embedding],
        best_so_far: f32,
    ) -> Option<ModelVote> {
        if models.is_empty() {
            return None;
        }

        let mut best_distance = f32::INFINITY;
        let mut model_count = 0;
        for model in models {
            let distance = compare(query, model);
            if distance < self.thresholds.max_distance {
                model_count += 1;
                if distance < best_distance {
                    best_distance = distance;
                }
            }
        }

        let model_ratio = model_count as f32 / models.len() as f32;
        let matched = if self.thresholds.min_model_ratio > 0.0 {
            model_ratio > self.thresholds.min_model_ratio
        } else {
            model_count >= models.len().min(self.thresholds.min_match_count)
                && best_distance < best_so_far
        };

        Some(ModelVote {
            matched,
            best_distance,
            model_count,
            model_ratio,
        })
    }
}
