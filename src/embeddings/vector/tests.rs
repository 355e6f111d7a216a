use super::*;

#[test]
fn self_similarity_is_one() {
    let v = vec![0.5, -1.2, 3.3, 0.7];
    let sim = cosine_similarity(&v, &v).expect("same dimensions");
    assert!((sim - 1.0).abs() < 1e-6);
}

#[test]
fn similarity_is_symmetric() {
    let a = vec![1.0, 2.0, 3.0];
    let b = vec![-2.0, 0.5, 1.0];
    let ab = cosine_similarity(&a, &b).expect("same dimensions");
    let ba = cosine_similarity(&b, &a).expect("same dimensions");
    assert!((ab - ba).abs() < 1e-6);
}

#[test]
fn orthogonal_vectors_score_zero() {
    let a = vec![1.0, 0.0];
    let b = vec![0.0, 1.0];
    let sim = cosine_similarity(&a, &b).expect("same dimensions");
    assert!(sim.abs() < 1e-6);
}

#[test]
fn opposite_vectors_score_negative_one() {
    let a = vec![1.0, 2.0];
    let b = vec![-1.0, -2.0];
    let sim = cosine_similarity(&a, &b).expect("same dimensions");
    assert!((sim + 1.0).abs() < 1e-6);
}

#[test]
fn mismatched_dimensions_fail() {
    let a = vec![1.0, 2.0];
    let b = vec![1.0, 2.0, 3.0];
    assert!(cosine_similarity(&a, &b).is_err());
}

#[test]
fn zero_magnitude_scores_zero() {
    let zero = vec![0.0, 0.0, 0.0];
    let v = vec![1.0, 2.0, 3.0];
    assert_eq!(cosine_similarity(&zero, &v).expect("same dimensions"), 0.0);
    assert_eq!(cosine_similarity(&v, &zero).expect("same dimensions"), 0.0);
}

#[test]
fn normalize_produces_unit_length() {
    let v = vec![3.0, 4.0];
    let unit = normalize(&v);
    assert!((magnitude(&unit) - 1.0).abs() < 1e-6);
    assert!((unit[0] - 0.6).abs() < 1e-6);
    assert!((unit[1] - 0.8).abs() < 1e-6);
}

#[test]
fn normalize_zero_vector_unchanged() {
    let zero = vec![0.0, 0.0];
    let out = normalize(&zero);
    assert_eq!(out, zero);
    assert!(!out.iter().any(|x| x.is_nan()));
}
