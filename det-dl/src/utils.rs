use crate::common::*;
use bbox::{Label, RectNum, XYXY};

/// Concatenate per-level `[R, N_i]` arrays along the instance axis.
pub fn concat_levels(levels: &[Array2<f32>]) -> Result<Array2<f32>> {
    ensure!(!levels.is_empty(), "at least one level is required");
    let rows = levels[0].nrows();
    ensure!(
        levels.iter().all(|level| level.nrows() == rows),
        "all levels must share the same row count"
    );

    let views: Vec<_> = levels.iter().map(|level| level.view()).collect();
    Ok(concatenate(Axis(1), &views)?)
}

/// Apply a function over a nested structure, returning a new one.
pub fn map_nested<T, U, F>(nested: &[Vec<T>], f: F) -> Vec<Vec<U>>
where
    F: Fn(&T) -> U,
{
    nested
        .iter()
        .map(|inner| inner.iter().map(&f).collect())
        .collect()
}

/// One-hot encode labels into a `[num_classes, N]` matrix.
pub fn one_hot(labels: ArrayView1<i64>, num_classes: usize) -> Result<Array2<f32>> {
    let n = labels.len();
    let mut out = Array2::<f32>::zeros((num_classes, n));
    for (i, &label) in labels.iter().enumerate() {
        ensure!(
            (0..num_classes as i64).contains(&label),
            "label {} out of range for {} classes",
            label,
            num_classes
        );
        out[[label as usize, i]] = 1.0;
    }
    Ok(out)
}

/// Indices sorting scores in descending order.
pub fn argsort_desc(scores: ArrayView1<f32>) -> Vec<usize> {
    (0..scores.len())
        .sorted_by_key(|&i| Reverse(r32(scores[i])))
        .collect()
}

/// Column-wise stable softmax over a `[C, N]` logit matrix.
pub fn softmax_axis0(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut out = logits.to_owned();
    for mut col in out.axis_iter_mut(Axis(1)) {
        let max = col.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        col.mapv_inplace(|x| (x - max).exp());
        let sum = col.sum();
        col.mapv_inplace(|x| x / sum);
    }
    out
}

/// Objectness probability from a two-row background/foreground logit
/// matrix, as emitted by a region-proposal classifier.
pub fn objectness(logits: ArrayView2<f32>) -> Result<Array1<f32>> {
    ensure!(
        logits.nrows() == 2,
        "objectness logits must have 2 rows, got {}",
        logits.nrows()
    );
    Ok(softmax_axis0(logits).row(1).to_owned())
}

/// Split ground-truth instances into the `[4, M]` box array and label
/// vector the dense pipeline consumes.
pub fn labels_to_arrays(instances: &[Label<XYXY<f32>, i64>]) -> (Array2<f32>, Array1<i64>) {
    let m = instances.len();
    let mut boxes = Array2::<f32>::zeros((4, m));
    let mut classes = Array1::<i64>::zeros(m);
    for (i, instance) in instances.iter().enumerate() {
        let [x_min, y_min, x_max, y_max] = instance.rect.xyxy();
        boxes[[0, i]] = x_min;
        boxes[[1, i]] = y_min;
        boxes[[2, i]] = x_max;
        boxes[[3, i]] = y_max;
        classes[i] = instance.class;
    }
    (boxes, classes)
}
