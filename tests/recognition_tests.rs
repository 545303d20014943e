use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use eigenface_recognition::{
    classify_image, persistence, CancellationToken, DistanceType, EigenfaceTrainer, FaceImage,
    FaceRecognizer, ImageDimensions, LabeledFace, RecognitionError, RecognizerConfig,
    TrainerConfig, TrainingSource, UNKNOWN_SUBJECT,
};
use image::{GrayImage, Luma};
use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

const SIDE: u32 = 64;

/// A full-period sinusoidal grating, different per subject.
fn subject_pattern(subject: u32) -> Array2<f64> {
    let (fr, fc) = (subject as f64, (4 - subject) as f64);
    Array2::from_shape_fn((SIDE as usize, SIDE as usize), |(r, c)| {
        128.0 + 60.0 * (2.0 * PI * (fr * r as f64 + fc * c as f64) / SIDE as f64).sin()
    })
}

fn noisy_face(subject: u32, rng: &mut ChaCha8Rng) -> FaceImage {
    let noise = Array2::random_using((SIDE as usize, SIDE as usize), Uniform::new(-3.0, 3.0), rng);
    FaceImage::new(subject_pattern(subject) + noise).unwrap()
}

/// Three subjects with four 64x64 images each.
fn gallery(seed: u64) -> Vec<LabeledFace> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (1..=3)
        .flat_map(|subject| (0..4).map(move |_| subject))
        .map(|subject| LabeledFace::new(subject, noisy_face(subject, &mut rng)))
        .collect()
}

fn trainer(distance_type: DistanceType, threshold: f64) -> EigenfaceTrainer {
    EigenfaceTrainer::new(TrainerConfig {
        requested_eigen_vectors_no: Some(5),
        distance_type,
        recognition_threshold: threshold,
    })
}

fn save_pgm(face: &FaceImage, path: &Path) {
    let pixels = face.pixels();
    GrayImage::from_fn(SIDE, SIDE, |x, y| {
        Luma([pixels[[y as usize, x as usize]].round().clamp(0.0, 255.0) as u8])
    })
    .save(path)
    .unwrap();
}

#[test]
fn held_out_face_is_identified() {
    let model = trainer(DistanceType::Euclidean, 0.6).train(&gallery(11)).unwrap();
    assert_eq!(model.eigen_vectors_no(), 5);
    assert_eq!(model.train_faces_no(), 12);

    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let query = noisy_face(2, &mut rng);
    let result = classify_image(&query, &model, 3).unwrap();

    assert_eq!(result.len(), 3);
    assert_eq!(result.candidates[0].subject_id, 2);
    assert!(result.candidates[0].confidence > 0.6, "{:?}", result);
    let mut ids: Vec<u32> = result.candidates.iter().map(|c| c.subject_id).collect();
    for pair in result.candidates.windows(2) {
        assert!(pair[0].confidence >= pair[1].confidence);
    }
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn far_away_face_is_rejected_as_unknown() {
    let faces = gallery(12);
    let model = trainer(DistanceType::Euclidean, 0.6).train(&faces).unwrap();
    // Mirror subject 2 through the average face, three times as far out.
    let average = model.average_face().pixels().clone();
    let query = FaceImage::new(&average - &((subject_pattern(2) - &average) * 3.0)).unwrap();
    let result = classify_image(&query, &model, 3).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.candidates[0].subject_id, UNKNOWN_SUBJECT);
    assert!(result.candidates[0].confidence < 0.6);
}

#[test]
fn unenrolled_face_is_rejected_as_unknown() {
    // A grating no subject was trained on, landing near the centre of the gallery.
    let stranger = |rng: &mut ChaCha8Rng| {
        let pattern = Array2::from_shape_fn((SIDE as usize, SIDE as usize), |(r, c)| {
            128.0 + 60.0 * (2.0 * PI * (5.0 * r as f64 + 2.0 * c as f64) / SIDE as f64).sin()
        });
        let noise = Array2::random_using((SIDE as usize, SIDE as usize), Uniform::new(-3.0, 3.0), rng);
        FaceImage::new(pattern + noise).unwrap()
    };
    for seed in 11..=13 {
        for distance_type in [DistanceType::Euclidean, DistanceType::Mahalanobis] {
            let model = trainer(distance_type, 0.6).train(&gallery(seed)).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(seed + 100);
            let result = classify_image(&stranger(&mut rng), &model, 3).unwrap();
            assert!(result.is_unknown(), "seed {} {:?}: {:?}", seed, distance_type, result);
            assert!(result.candidates[0].confidence < 0.6);

            // An enrolled subject is still accepted by the same model.
            let known = classify_image(&noisy_face(1, &mut rng), &model, 1).unwrap();
            assert_eq!(known.candidates[0].subject_id, 1, "seed {} {:?}", seed, distance_type);
        }
    }
}

#[test]
fn single_training_face_is_insufficient() {
    let faces = gallery(13).into_iter().take(1).collect::<Vec<_>>();
    assert!(matches!(
        trainer(DistanceType::Euclidean, 0.6).train(&faces),
        Err(RecognitionError::InsufficientTrainingData(_))
    ));
}

#[test]
fn smaller_query_is_a_dimension_mismatch() {
    let model = trainer(DistanceType::Mahalanobis, 0.6).train(&gallery(14)).unwrap();
    let small = FaceImage::new(Array2::from_elem((32, 32), 100.0)).unwrap();
    match classify_image(&small, &model, 1) {
        Err(RecognitionError::DimensionMismatch { expected, found }) => {
            assert_eq!(expected, ImageDimensions::new(64, 64));
            assert_eq!(found, ImageDimensions::new(32, 32));
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn training_is_deterministic() {
    let faces = gallery(15);
    let first = trainer(DistanceType::Mahalanobis, 0.5).train(&faces).unwrap();
    let second = trainer(DistanceType::Mahalanobis, 0.5).train(&faces).unwrap();
    assert!(first.approx_eq(&second, 1e-12));
}

#[test]
fn saved_models_classify_like_the_original() {
    let dir = tempdir().unwrap();
    let model = trainer(DistanceType::Mahalanobis, 0.3).train(&gallery(16)).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let queries: Vec<FaceImage> = (1..=3).map(|s| noisy_face(s, &mut rng)).collect();

    for name in ["model.json", "model.bin"] {
        let path = dir.path().join(name);
        persistence::save(&model, &path).unwrap();
        let loaded = persistence::load(&path).unwrap();
        assert!(loaded.approx_eq(&model, 1e-9), "{}", name);
        for query in &queries {
            let expected = classify_image(query, &model, 3).unwrap();
            let actual = classify_image(query, &loaded, 3).unwrap();
            assert_eq!(expected.len(), actual.len());
            for (e, a) in expected.candidates.iter().zip(&actual.candidates) {
                assert_eq!(e.subject_id, a.subject_id);
                assert_abs_diff_eq!(e.confidence, a.confidence, epsilon = 1e-9);
            }
        }
    }
}

#[test]
fn truncated_model_file_is_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let model = trainer(DistanceType::Euclidean, 0.6).train(&gallery(17)).unwrap();
    persistence::save(&model, &path).unwrap();
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

    let recognizer = FaceRecognizer::initialize(RecognizerConfig::default()).unwrap();
    assert!(matches!(
        recognizer.load_model(Some(&path)),
        Err(RecognitionError::CorruptModel(_))
    ));
    assert!(!recognizer.is_ready());
}

/// Two subjects separated along a low-variance "identity" pixel while a
/// second "lighting" pixel varies widely and interleaves the subjects.
fn anisotropic_face(lighting: f64, identity: f64) -> FaceImage {
    FaceImage::from_shape_fn(ImageDimensions::new(4, 4), |(r, c)| match (r, c) {
        (0, 0) => 100.0 + lighting,
        (0, 1) => 100.0 + identity,
        _ => 100.0,
    })
    .unwrap()
}

#[test]
fn mahalanobis_separates_at_least_as_well_as_euclidean() {
    let mut training = Vec::new();
    for lighting in [-20.0, 0.0, 20.0] {
        training.push(LabeledFace::new(1, anisotropic_face(lighting, -1.0)));
    }
    for lighting in [-10.0, 10.0, 30.0] {
        training.push(LabeledFace::new(2, anisotropic_face(lighting, 1.0)));
    }
    let test_set = vec![
        LabeledFace::new(1, anisotropic_face(10.0, -1.0)),
        LabeledFace::new(1, anisotropic_face(30.0, -1.0)),
        LabeledFace::new(2, anisotropic_face(0.0, 1.0)),
        LabeledFace::new(2, anisotropic_face(20.0, 1.0)),
        LabeledFace::new(1, anisotropic_face(-20.0, -1.0)),
    ];

    let accuracy = |distance_type| {
        let model = EigenfaceTrainer::new(TrainerConfig {
            requested_eigen_vectors_no: None,
            distance_type,
            recognition_threshold: 0.0,
        })
        .train(&training)
        .unwrap();
        assert_eq!(model.eigen_vectors_no(), 2);
        eigenface_recognition::evaluation::evaluate(&test_set, &model).accuracy()
    };
    let euclidean = accuracy(DistanceType::Euclidean);
    let mahalanobis = accuracy(DistanceType::Mahalanobis);
    assert!(mahalanobis >= euclidean);
    assert_eq!(mahalanobis, 1.0);
    assert!(euclidean < 1.0);
}

#[test]
fn recognizer_trains_from_directory_and_evaluates() {
    let dir = tempdir().unwrap();
    let train_root = dir.path().join("train");
    let test_root = dir.path().join("test");
    fs::create_dir(&test_root).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(21);
    let mut test_manifest = String::from("# held-out faces\n");
    for subject in 1..=3 {
        let subject_dir = train_root.join(subject.to_string());
        fs::create_dir_all(&subject_dir).unwrap();
        for i in 0..4 {
            save_pgm(&noisy_face(subject, &mut rng), &subject_dir.join(format!("{}.pgm", i)));
        }
        let name = format!("query_{}.pgm", subject);
        save_pgm(&noisy_face(subject, &mut rng), &test_root.join(&name));
        test_manifest.push_str(&format!("{} {}\n", name, subject));
    }
    fs::write(test_root.join("test.txt"), test_manifest).unwrap();

    let recognizer = FaceRecognizer::initialize(RecognizerConfig {
        recognition_threshold: 0.6,
        distance_type: DistanceType::Euclidean,
        requested_eigen_vectors_no: Some(5),
        default_model_path: dir.path().join("training_data.bin"),
        export_dir: dir.path().to_path_buf(),
        ..RecognizerConfig::default()
    })
    .unwrap();
    recognizer
        .train(&TrainingSource::Directory(train_root), true)
        .unwrap();
    let model = recognizer.model().unwrap();
    assert_eq!(model.train_faces_no(), 12);
    assert_eq!(model.subject_ids(), &[1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);

    let report = recognizer.evaluate(&test_root.join("test.txt")).unwrap();
    assert_eq!(report.attempted, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.accuracy(), 1.0);

    recognizer.save_model(None).unwrap();
    assert!(dir.path().join("training_data.bin").exists());
}

#[test]
fn readers_see_a_complete_model_while_retraining() {
    let dir = tempdir().unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(31);
    let mut manifest = String::new();
    for subject in 1..=3 {
        for i in 0..4 {
            let name = format!("s{}_{}.pgm", subject, i);
            save_pgm(&noisy_face(subject, &mut rng), &dir.path().join(&name));
            manifest.push_str(&format!("{} {}\n", subject, name));
        }
    }
    let manifest_path = dir.path().join("train.txt");
    fs::write(&manifest_path, manifest).unwrap();
    let source = TrainingSource::ManifestFile(manifest_path);

    let recognizer = Arc::new(
        FaceRecognizer::initialize(RecognizerConfig {
            distance_type: DistanceType::Euclidean,
            ..RecognizerConfig::default()
        })
        .unwrap(),
    );
    recognizer.train(&source, false).unwrap();
    let query = noisy_face(3, &mut rng);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let recognizer = Arc::clone(&recognizer);
            let query = query.clone();
            std::thread::spawn(move || {
                for _ in 0..10 {
                    let results = recognizer.classify_batch(&[query.clone()], 1).unwrap();
                    assert_eq!(results[0].best().unwrap().subject_id, 3);
                }
            })
        })
        .collect();
    for _ in 0..3 {
        recognizer.train(&source, false).unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }

    let token = CancellationToken::new();
    token.cancel();
    let before = recognizer.model().unwrap();
    assert!(matches!(
        recognizer.train_with_cancellation(&source, false, &token),
        Err(RecognitionError::Cancelled)
    ));
    assert!(Arc::ptr_eq(&before, &recognizer.model().unwrap()));
}
