pub mod backend;
pub mod codec;
pub mod compare;
pub mod config;
pub mod detect;
pub mod embed;
pub mod recognize;
pub mod store;

use compare::EmbeddingMatcher;
use detect::FaceDetector;
use embed::FaceEmbedder;
use image::RgbImage;
use recognize::{RecognizedFace, ScannedFace, Verdict};
use store::{FaceStore, StoreBackend};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Storage error: {0}")]
    Store(#[from] store::StoreError),
    #[error("Backend error: {0}")]
    Backend(#[from] backend::BackendError),
    #[error("Detection error: {0}")]
    Detection(#[from] detect::DetectionError),
    #[error("Embedding error: {0}")]
    Embedding(#[from] embed::EmbedError),
    #[error("No face found in frame")]
    NoFace,
    #[error("Expected one face, found {0}")]
    MultipleFaces(usize),
}

/// Detection, embedding and matching over one face store.
///
/// Every operation takes `&mut self`: the store cache is not synchronized
/// and a recognition pass must not overlap an enrollment.
pub struct FaceRecognizer<D, E, B> {
    config: config::Config,
    detector: D,
    embedder: E,
    store: FaceStore<B>,
    matcher: EmbeddingMatcher,
}

impl<D, E, B> FaceRecognizer<D, E, B>
where
    D: FaceDetector,
    E: FaceEmbedder,
    B: StoreBackend,
{
    /// Create a recognizer; the configuration is validated first
    pub fn new(
        config: config::Config,
        detector: D,
        embedder: E,
        store: FaceStore<B>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let matcher = EmbeddingMatcher::new(config.matching.thresholds());
        log::debug!("Matching with {:?}", matcher.thresholds());

        Ok(Self {
            config,
            detector,
            embedder,
            store,
            matcher,
        })
    }

    /// Detect and embed every sufficiently confident face in `frame`
    fn scan(&mut self, frame: &RgbImage) -> Result<Vec<ScannedFace>, Error> {
        let faces = self.detector.detect(frame)?;
        let detected = faces.len();
        let faces = detect::filter_confident(faces, self.config.detection.min_confidence);
        log::debug!(
            "Detected {} face(s), {} above confidence {}",
            detected,
            faces.len(),
            self.config.detection.min_confidence
        );

        let mut scanned = Vec::with_capacity(faces.len());
        for face in faces {
            let embedding = self.embedder.embed(frame, &face)?;
            embed::check_dimension(&embedding)?;
            let brightness = self.embedder.brightness(&embedding);
            scanned.push(ScannedFace {
                detection: face,
                embedding,
                brightness,
            });
        }
        Ok(scanned)
    }

    /// Match every face in `frame` against the enrolled identities
    pub fn recognize(&mut self, frame: &RgbImage) -> Result<Vec<RecognizedFace>, Error> {
        let faces = self.scan(frame)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        Ok(recognize::recognize(faces, &mut self.store, &self.matcher))
    }

    /// Add the single face in `frame` to `name`'s models.
    ///
    /// Returns false if `name` is unknown and `allow_create` is not set, or
    /// if the store refused the write.
    pub fn enroll(
        &mut self,
        name: &str,
        frame: &RgbImage,
        token: &[u8],
        allow_create: bool,
    ) -> Result<bool, Error> {
        let mut faces = self.scan(frame)?;
        let face = match faces.len() {
            0 => return Err(Error::NoFace),
            1 => faces.remove(0),
            n => return Err(Error::MultipleFaces(n)),
        };

        log::info!(
            "Enrolling face for {} (confidence {:.2})",
            name,
            face.detection.confidence
        );
        let enrolled = self
            .store
            .extend_registered(name, face.embedding, token, allow_create)?;
        if !enrolled {
            log::warn!("Enrollment for {} was not stored", name);
        }
        Ok(enrolled)
    }

    /// Recognize `frame` and reduce the result to an authentication verdict
    pub fn authenticate(&mut self, frame: &RgbImage) -> Result<Verdict, Error> {
        let results = self.recognize(frame)?;
        let verdict = recognize::assess(&results);
        log::info!("Authentication verdict: {:?}", verdict);
        Ok(verdict)
    }

    pub fn config(&self) -> &config::Config {
        &self.config
    }

    /// Get the face store for direct access
    pub fn store(&self) -> &FaceStore<B> {
        &self.store
    }

    /// Get mutable access to the face store
    pub fn store_mut(&mut self) -> &mut FaceStore<B> {
        &mut self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::Config;
    use crate::detect::{BoundingBox, DetectedFace, DetectionError};
    use crate::embed::{BrightnessProbe, EmbedError, Embedding, EMBEDDING_DIM};
    use ndarray::Array1;

    /// Reports the same faces for every frame
    struct FixedDetector(Vec<DetectedFace>);

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, DetectionError> {
            Ok(self.0.clone())
        }
    }

    fn one_hot(hot: usize) -> Embedding {
        Array1::from_shape_fn(EMBEDDING_DIM, |i| if i == hot { 1.0 } else { 0.0 })
    }

    /// One-hot embedding at the face's x coordinate
    struct OneHotEmbedder {
        probe: Option<BrightnessProbe>,
    }

    impl FaceEmbedder for OneHotEmbedder {
        fn embed(&mut self, _frame: &RgbImage, face: &DetectedFace) -> Result<Embedding, EmbedError> {
            Ok(one_hot(face.bbox.x as usize))
        }

        fn brightness(&mut self, _embedding: &Embedding) -> Option<BrightnessProbe> {
            self.probe
        }
    }

    fn face(x: f32, confidence: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x,
                y: 0.0,
                width: 20.0,
                height: 20.0,
            },
            confidence,
        }
    }

    fn recognizer(
        faces: Vec<DetectedFace>,
    ) -> FaceRecognizer<FixedDetector, OneHotEmbedder, MemoryBackend> {
        FaceRecognizer::new(
            Config::default(),
            FixedDetector(faces),
            OneHotEmbedder { probe: None },
            FaceStore::new(MemoryBackend::new()),
        )
        .unwrap()
    }

    fn frame() -> RgbImage {
        RgbImage::new(4, 4)
    }

    #[test]
    fn test_enroll_then_authenticate() {
        let mut recognizer = recognizer(vec![face(3.0, 0.9)]);

        assert!(!recognizer.enroll("erin", &frame(), b"hat", false).unwrap());
        assert!(recognizer.enroll("erin", &frame(), b"hat", true).unwrap());
        assert!(recognizer.enroll("erin", &frame(), b"hat", false).unwrap());
        assert_eq!(recognizer.store_mut().get_vectors("erin").unwrap().len(), 2);

        assert_eq!(
            recognizer.authenticate(&frame()).unwrap(),
            Verdict::Authenticated {
                name: "erin".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_face_is_not_recognized() {
        let mut recognizer = recognizer(vec![face(3.0, 0.9)]);
        recognizer
            .store_mut()
            .register_one("erin", one_hot(7), b"", false);

        let results = recognizer.recognize(&frame()).unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].is_recognized());
        assert_eq!(recognizer.authenticate(&frame()).unwrap(), Verdict::NotRecognized);
    }

    #[test]
    fn test_low_confidence_faces_are_ignored() {
        let mut recognizer = recognizer(vec![face(3.0, 0.3)]);

        assert!(recognizer.recognize(&frame()).unwrap().is_empty());
        assert!(matches!(
            recognizer.enroll("erin", &frame(), b"", true),
            Err(Error::NoFace)
        ));
        assert_eq!(recognizer.authenticate(&frame()).unwrap(), Verdict::NotDetected);
    }

    #[test]
    fn test_enroll_requires_single_face() {
        let mut recognizer = recognizer(vec![face(3.0, 0.9), face(5.0, 0.8)]);

        assert!(matches!(
            recognizer.enroll("erin", &frame(), b"", true),
            Err(Error::MultipleFaces(2))
        ));
        assert!(recognizer.store_mut().names().is_empty());
        assert_eq!(
            recognizer.authenticate(&frame()).unwrap(),
            Verdict::Obscured { faces: 2 }
        );
    }

    #[test]
    fn test_poor_light_is_insufficient() {
        let mut recognizer = FaceRecognizer::new(
            Config::default(),
            FixedDetector(vec![face(3.0, 0.9)]),
            OneHotEmbedder {
                probe: Some(BrightnessProbe {
                    bright: 0.2,
                    dark: 0.2,
                }),
            },
            FaceStore::new(MemoryBackend::new()),
        )
        .unwrap();

        assert!(recognizer.enroll("erin", &frame(), b"", true).unwrap());
        assert_eq!(recognizer.authenticate(&frame()).unwrap(), Verdict::Insufficient);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = Config::default();
        config.matching.min_match_count = 0;

        let result = FaceRecognizer::new(
            config,
            FixedDetector(Vec::new()),
            OneHotEmbedder { probe: None },
            FaceStore::new(MemoryBackend::new()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
