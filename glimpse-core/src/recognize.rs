//! Matching scanned faces against every enrolled identity.

use crate::compare::EmbeddingMatcher;
use crate::detect::DetectedFace;
use crate::embed::{BrightnessProbe, Embedding};
use crate::store::{FaceStore, StoreBackend};
use std::collections::BTreeSet;

/// A detected face together with its embedding
#[derive(Debug, Clone)]
pub struct ScannedFace {
    pub detection: DetectedFace,
    pub embedding: Embedding,
    pub brightness: Option<BrightnessProbe>,
}

impl ScannedFace {
    pub fn new(detection: DetectedFace, embedding: Embedding) -> Self {
        Self {
            detection,
            embedding,
            brightness: None,
        }
    }
}

/// Lighting quality derived from the embedder's probe scores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrightnessHint {
    Unknown,
    Poor,
    Suboptimal,
    Good,
}

impl BrightnessHint {
    pub fn from_probe(probe: Option<BrightnessProbe>) -> Self {
        match probe {
            None => Self::Unknown,
            Some(p) if p.bright < 0.5 || p.dark < 0.4 => Self::Poor,
            Some(p) if p.bright + p.dark < 2.2 => Self::Suboptimal,
            Some(_) => Self::Good,
        }
    }
}

/// Recognition result for one face
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedFace {
    pub detection: DetectedFace,
    /// Matched identity, if any
    pub name: Option<String>,
    /// Best passing distance of the matched identity, +inf without a match
    pub distance: f32,
    /// Passing models of the matched identity
    pub model_count: usize,
    /// Passing ratio of the matched identity
    pub model_ratio: f32,
    pub brightness: BrightnessHint,
}

impl RecognizedFace {
    pub fn is_recognized(&self) -> bool {
        self.name.is_some()
    }
}

/// Match each face against every identity in `store`.
///
/// Identities are visited in lexicographic order. An identity that matches
/// replaces the current candidate; in count mode it must also have a smaller
/// distance, so the closest identity wins and ties keep the earlier name.
/// Identities whose data cannot be read are skipped.
///
/// Not reentrant: the store cache is updated as a side effect.
pub fn recognize<B: StoreBackend>(
    faces: Vec<ScannedFace>,
    store: &mut FaceStore<B>,
    matcher: &EmbeddingMatcher,
) -> Vec<RecognizedFace> {
    let names = store.names();
    if names.is_empty() {
        log::debug!("No enrolled faces, nothing can match");
    }

    faces
        .into_iter()
        .map(|face| recognize_face(face, &names, store, matcher))
        .collect()
}

fn recognize_face<B: StoreBackend>(
    face: ScannedFace,
    names: &BTreeSet<String>,
    store: &mut FaceStore<B>,
    matcher: &EmbeddingMatcher,
) -> RecognizedFace {
    let mut result = RecognizedFace {
        detection: face.detection,
        name: None,
        distance: f32::INFINITY,
        model_count: 0,
        model_ratio: 0.0,
        brightness: BrightnessHint::from_probe(face.brightness),
    };

    for name in names {
        let models = match store.get_vectors(name) {
            Ok(models) => models,
            Err(e) => {
                log::warn!("Skipping {}: {}", name, e);
                continue;
            }
        };

        let Some(vote) = matcher.evaluate(&face.embedding, models, result.distance) else {
            log::warn!("Skipping {}: no stored models", name);
            continue;
        };

        log::debug!(
            "{}: {} model(s) passed, best distance {:.4}, matched = {}",
            name,
            vote.model_count,
            vote.best_distance,
            vote.matched
        );

        if vote.matched {
            result.name = Some(name.clone());
            result.distance = vote.best_distance;
            result.model_count = vote.model_count;
            result.model_ratio = vote.model_ratio;
        }
    }

    result
}

/// What one recognition pass means for an authentication attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    NotDetected,
    /// More than one face in view
    Obscured { faces: usize },
    /// Lighting too poor to trust the result
    Insufficient,
    NotRecognized,
    Authenticated { name: String },
}

pub fn assess(results: &[RecognizedFace]) -> Verdict {
    match results {
        [] => Verdict::NotDetected,
        [face] if face.brightness == BrightnessHint::Poor => Verdict::Insufficient,
        [face] => match &face.name {
            Some(name) => Verdict::Authenticated { name: name.clone() },
            None => Verdict::NotRecognized,
        },
        faces => Verdict::Obscured { faces: faces.len() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::compare::MatchThresholds;
    use crate::detect::BoundingBox;
    use crate::store::encode_name;
    use ndarray::arr1;

    fn detection() -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x: 1.0,
                y: 2.0,
                width: 30.0,
                height: 40.0,
            },
            confidence: 0.95,
        }
    }

    /// Unit vector exactly `distance` away from (1, 0)
    fn at_distance(distance: f32) -> Embedding {
        let cos = 1.0 - distance * distance / 2.0;
        arr1(&[cos, (1.0 - cos * cos).sqrt()])
    }

    fn query() -> ScannedFace {
        ScannedFace::new(detection(), arr1(&[1.0, 0.0]))
    }

    fn matcher(max_distance: f32, min_model_ratio: f32) -> EmbeddingMatcher {
        EmbeddingMatcher::new(MatchThresholds {
            max_distance,
            min_match_count: 1,
            min_model_ratio,
        })
    }

    #[test]
    fn test_exact_embedding_matches() {
        let mut store = FaceStore::new(MemoryBackend::new());
        let carol = arr1(&[0.2, -0.4, 0.9, 0.1]);
        assert!(store.register_one("carol", carol.clone(), b"", false));

        let faces = vec![ScannedFace::new(detection(), carol)];
        let results = recognize(faces, &mut store, &matcher(0.7, 0.0));

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name.as_deref(), Some("carol"));
        assert!(results[0].distance.abs() < 1e-6);
        assert_eq!(results[0].model_count, 1);
        assert_eq!(results[0].model_ratio, 1.0);
        assert_eq!(results[0].detection, detection());
    }

    #[test]
    fn test_empty_store_yields_no_match() {
        let mut store = FaceStore::new(MemoryBackend::new());
        let results = recognize(vec![query(), query()], &mut store, &matcher(0.7, 0.0));

        assert_eq!(results.len(), 2);
        for result in results {
            assert!(!result.is_recognized());
            assert_eq!(result.distance, f32::INFINITY);
            assert_eq!(result.model_count, 0);
            assert_eq!(result.model_ratio, 0.0);
        }
    }

    #[test]
    fn test_closest_identity_wins_in_count_mode() {
        let mut store = FaceStore::new(MemoryBackend::new());
        store.register_one("anna", at_distance(0.3), b"", false);
        store.register_one("zed", at_distance(0.2), b"", false);

        let results = recognize(vec![query()], &mut store, &matcher(0.5, 0.0));
        assert_eq!(results[0].name.as_deref(), Some("zed"));
        assert!((results[0].distance - 0.2).abs() < 1e-4);

        let mut store = FaceStore::new(MemoryBackend::new());
        store.register_one("anna", at_distance(0.2), b"", false);
        store.register_one("zed", at_distance(0.3), b"", false);

        let results = recognize(vec![query()], &mut store, &matcher(0.5, 0.0));
        assert_eq!(results[0].name.as_deref(), Some("anna"));
    }

    #[test]
    fn test_equal_distances_keep_first_name() {
        let mut store = FaceStore::new(MemoryBackend::new());
        store.register_one("zed", at_distance(0.2), b"", false);
        store.register_one("anna", at_distance(0.2), b"", false);

        let results = recognize(vec![query()], &mut store, &matcher(0.5, 0.0));
        assert_eq!(results[0].name.as_deref(), Some("anna"));
    }

    #[test]
    fn test_ratio_mode_last_qualifying_identity_wins() {
        let mut store = FaceStore::new(MemoryBackend::new());
        store.register("anna", vec![at_distance(0.1), at_distance(0.1)], b"", false);
        store.register(
            "zed",
            vec![at_distance(0.4), at_distance(0.4), at_distance(0.9)],
            b"",
            false,
        );

        let results = recognize(vec![query()], &mut store, &matcher(0.5, 0.5));
        assert_eq!(results[0].name.as_deref(), Some("zed"));
        assert_eq!(results[0].model_count, 2);
        assert!((results[0].model_ratio - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_corrupt_identity_is_skipped() {
        let mut backend = MemoryBackend::new();
        backend.put(&encode_name("broken"), "", "", false);
        let mut store = FaceStore::new(backend);
        store.register_one("carol", arr1(&[1.0, 0.0]), b"", false);

        let results = recognize(vec![query()], &mut store, &matcher(0.7, 0.0));
        assert_eq!(results[0].name.as_deref(), Some("carol"));
    }

    #[test]
    fn test_each_face_is_matched_independently() {
        let mut store = FaceStore::new(MemoryBackend::new());
        store.register_one("anna", arr1(&[1.0, 0.0]), b"", false);
        store.register_one("zed", arr1(&[0.0, 1.0]), b"", false);

        let faces = vec![
            ScannedFace::new(detection(), arr1(&[0.0, 2.0])),
            ScannedFace::new(detection(), arr1(&[3.0, 0.0])),
            ScannedFace::new(detection(), arr1(&[-1.0, -1.0])),
        ];
        let results = recognize(faces, &mut store, &matcher(0.5, 0.0));

        let names: Vec<Option<&str>> = results.iter().map(|r| r.name.as_deref()).collect();
        assert_eq!(names, vec![Some("zed"), Some("anna"), None]);
    }

    #[test]
    fn test_brightness_hint() {
        let hint = |bright, dark| BrightnessHint::from_probe(Some(BrightnessProbe { bright, dark }));

        assert_eq!(BrightnessHint::from_probe(None), BrightnessHint::Unknown);
        assert_eq!(hint(0.4, 1.5), BrightnessHint::Poor);
        assert_eq!(hint(1.5, 0.3), BrightnessHint::Poor);
        assert_eq!(hint(1.0, 1.0), BrightnessHint::Suboptimal);
        assert_eq!(hint(1.2, 1.1), BrightnessHint::Good);
    }

    fn result(name: Option<&str>, brightness: BrightnessHint) -> RecognizedFace {
        RecognizedFace {
            detection: detection(),
            name: name.map(str::to_string),
            distance: if name.is_some() { 0.1 } else { f32::INFINITY },
            model_count: usize::from(name.is_some()),
            model_ratio: if name.is_some() { 1.0 } else { 0.0 },
            brightness,
        }
    }

    #[test]
    fn test_assess() {
        use BrightnessHint::*;

        assert_eq!(assess(&[]), Verdict::NotDetected);
        assert_eq!(
            assess(&[result(Some("a"), Good), result(None, Good)]),
            Verdict::Obscured { faces: 2 }
        );
        assert_eq!(assess(&[result(Some("a"), Poor)]), Verdict::Insufficient);
        assert_eq!(assess(&[result(None, Unknown)]), Verdict::NotRecognized);
        assert_eq!(
            assess(&[result(Some("a"), Suboptimal)]),
            Verdict::Authenticated {
                name: "a".to_string()
            }
        );
    }
}
