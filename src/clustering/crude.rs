use crate::arrayops::{argsort, ppm_deviation};

use super::ClusterId;

/// Split the mass-sorted signals into clusters wherever the PPM gap between two
/// consecutive masses exceeds `min_difference_ppm`.
///
/// The returned cluster ids are in the order of `mz`, not in sorted order, and are
/// numbered from 0 in ascending mass. Equal masses keep their input order. No signal
/// is excluded.
pub fn crude_cluster(mz: &[f64], min_difference_ppm: f64) -> Vec<ClusterId> {
    let order = argsort(mz);
    let mut ids = vec![0; mz.len()];
    let mut current: ClusterId = 0;
    for pair in order.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if ppm_deviation(mz[next], mz[prev]) > min_difference_ppm {
            current += 1;
        }
        ids[next] = current;
    }
    ids
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clustering::{cluster_members, reindex_clusters};

    #[test]
    fn test_crude_cluster() {
        let mz = [300.0, 100.0, 100.002, 300.0003, 100.001, 500.0];
        let ids = crude_cluster(&mz, 15.0);
        assert_eq!(ids, vec![1, 0, 0, 1, 0, 2]);
    }

    #[test]
    fn test_crude_cluster_threshold_is_exclusive() {
        // A gap no larger than the threshold does not split
        let mz = [100.0, 100.001];
        assert_eq!(crude_cluster(&mz, 10.0 + 1e-6), vec![0, 0]);
        assert_eq!(crude_cluster(&mz, 9.0), vec![0, 1]);
        assert!(crude_cluster(&[], 10.0).is_empty());
        assert_eq!(crude_cluster(&[42.0], 10.0), vec![0]);
    }

    #[test]
    fn test_crude_cluster_idempotent() {
        let mz: Vec<f64> = (0..200)
            .map(|i| 150.0 + (i % 7) as f64 * 0.5 + (i as f64 * 0.37).sin() * 1e-4)
            .collect();
        let first = crude_cluster(&mz, 20.0);
        for (_, members) in cluster_members(&first) {
            let sub: Vec<f64> = members.iter().map(|i| mz[*i]).collect();
            let again = crude_cluster(&sub, 20.0);
            assert!(again.iter().all(|id| *id == 0));
        }
        let again = crude_cluster(&mz, 20.0);
        assert_eq!(reindex_clusters(&again), reindex_clusters(&first));
    }

    #[test]
    fn test_partition_complete() {
        let mz: Vec<f64> = (0..500).map(|i| 100.0 + (i * 37 % 101) as f64 * 0.013).collect();
        let ids = crude_cluster(&mz, 5.0);
        let total: usize = cluster_members(&ids).values().map(|m| m.len()).sum();
        assert_eq!(total, mz.len());
        assert!(ids.iter().all(|i| *i >= 0));
    }
}
