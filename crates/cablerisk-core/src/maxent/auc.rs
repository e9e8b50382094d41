//! Area under the ROC curve via the Mann–Whitney rank statistic.

/// AUC of `scores` against binary `labels` (1 = presence). Tied scores share
/// their average rank. `None` when either class is absent.
pub fn auc(labels: &[u8], scores: &[f64]) -> Option<f64> {
    debug_assert_eq!(labels.len(), scores.len());
    let n = labels.len();
    let n_pos = labels.iter().filter(|&&l| l == 1).count() as f64;
    let n_neg = n as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return None;
    }

    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&i, &j| scores[i].total_cmp(&scores[j]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && scores[idx[j]] == scores[idx[i]] {
            j += 1;
        }
        // Ranks are 1-based; ties get the mean of i+1..=j.
        let avg_rank = (i + j + 1) as f64 / 2.0;
        rank_sum_pos += idx[i..j].iter().filter(|&&k| labels[k] == 1).count() as f64 * avg_rank;
        i = j;
    }

    Some((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_and_inverted_ranking() {
        let labels = [1, 1, 0, 0, 0];
        assert_eq!(auc(&labels, &[0.9, 0.8, 0.3, 0.2, 0.1]), Some(1.0));
        assert_eq!(auc(&labels, &[0.1, 0.2, 0.3, 0.8, 0.9]), Some(0.0));
    }

    #[test]
    fn ties_count_half() {
        // Every pair tied → 0.5.
        assert_eq!(auc(&[1, 0, 1, 0], &[0.4; 4]), Some(0.5));
        // One of the four pairs tied, the rest correctly ordered → 3.5 / 4.
        assert_eq!(auc(&[1, 1, 0, 0], &[0.9, 0.5, 0.5, 0.1]), Some(0.875));
    }

    #[test]
    fn single_class_has_no_auc() {
        assert_eq!(auc(&[1, 1], &[0.2, 0.3]), None);
        assert_eq!(auc(&[], &[]), None);
    }
}
