//! Generator-level truth: hard-process particle flags, per-event boson and
//! top transverse momenta for theory k-factors, and the heavy-flavor
//! indicator used to split V+jets samples.

use crate::event::EventBatch;
use mt_core::Result;

/// statusFlags bit: particle comes from the hard process.
const FROM_HARD_PROCESS: u64 = 1 << 8;
/// statusFlags bit: last copy of the particle in the shower history.
const IS_LAST_COPY: u64 = 1 << 13;

fn is_hard_final(status_flags: f64) -> bool {
    let bits = status_flags as u64;
    bits & FROM_HARD_PROCESS != 0 && bits & IS_LAST_COPY != 0
}

/// Per-event generator-truth summary.
#[derive(Debug, Clone)]
pub struct GenSummary {
    /// Transverse momenta of hard-process final-copy top quarks, per event.
    pub top_pts: Vec<Vec<f64>>,
    /// Maximum hard-process W-boson pt per event (0 when none).
    pub max_w_pt: Vec<f64>,
    /// Maximum hard-process Z-boson pt per event (0 when none).
    pub max_z_pt: Vec<f64>,
    /// 1 when the event has a hard-process final-copy b or c quark, else 0.
    pub heavy_flavor: Vec<f64>,
}

impl GenSummary {
    /// Scan the `GenPart` table of a simulated batch.
    pub fn from_batch(batch: &EventBatch) -> Result<Self> {
        let gen = batch.objects("GenPart");
        let n_events = batch.n_events();

        if gen.n_objects() == 0 {
            return Ok(Self {
                top_pts: vec![Vec::new(); n_events],
                max_w_pt: vec![0.0; n_events],
                max_z_pt: vec![0.0; n_events],
                heavy_flavor: vec![0.0; n_events],
            });
        }

        let pt = gen.column("pt")?;
        let pdg = gen.column("pdgId")?;
        let status_flags = gen.column("statusFlags")?;

        let mut top_pts = Vec::with_capacity(n_events);
        let mut max_w_pt: Vec<f64> = vec![0.0; n_events];
        let mut max_z_pt: Vec<f64> = vec![0.0; n_events];
        let mut heavy_flavor = vec![0.0; n_events];

        for ev in 0..n_events {
            let mut tops = Vec::new();
            for i in gen.range(ev) {
                if !is_hard_final(status_flags[i]) {
                    continue;
                }
                match (pdg[i] as i64).abs() {
                    6 => tops.push(pt[i]),
                    24 => max_w_pt[ev] = max_w_pt[ev].max(pt[i]),
                    23 => max_z_pt[ev] = max_z_pt[ev].max(pt[i]),
                    4 | 5 => heavy_flavor[ev] = 1.0,
                    _ => {}
                }
            }
            top_pts.push(tops);
        }

        Ok(Self { top_pts, max_w_pt, max_z_pt, heavy_flavor })
    }

    /// 0/1 light-flavor indicator, the complement of [`GenSummary::heavy_flavor`].
    pub fn light_flavor(&self) -> Vec<f64> {
        self.heavy_flavor.iter().map(|&h| 1.0 - h).collect()
    }
}

/// Whether a dataset gets the heavy/light-flavor split treatment.
pub fn wants_flavor_split(dataset: &str) -> bool {
    dataset.contains("WJets") || dataset.contains("DY") || dataset.contains("ZJets")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::JaggedTable;

    fn gen_batch(counts: &[usize], pt: Vec<f64>, pdg: Vec<f64>, flags: Vec<f64>) -> EventBatch {
        let mut offsets = vec![0usize];
        for c in counts {
            offsets.push(offsets.last().unwrap() + c);
        }
        let table = JaggedTable::new(
            offsets,
            [
                ("pt".to_string(), pt),
                ("pdgId".to_string(), pdg),
                ("statusFlags".to_string(), flags),
            ],
        )
        .unwrap();
        EventBatch::new(
            "DY_test",
            counts.len(),
            [],
            [],
            [("GenPart".to_string(), table)],
            Some(vec![1.0; counts.len()]),
        )
        .unwrap()
    }

    const HARD_FINAL: f64 = ((1u64 << 8) | (1u64 << 13)) as f64;

    #[test]
    fn flags_require_both_bits() {
        assert!(is_hard_final(HARD_FINAL));
        assert!(!is_hard_final((1u64 << 8) as f64));
        assert!(!is_hard_final((1u64 << 13) as f64));
    }

    #[test]
    fn heavy_flavor_indicator() {
        // Event 0: hard-process b quark. Event 1: b quark without the hard
        // flags. Event 2: only a Z.
        let b = gen_batch(
            &[1, 1, 1],
            vec![40.0, 40.0, 300.0],
            vec![5.0, 5.0, 23.0],
            vec![HARD_FINAL, (1u64 << 13) as f64, HARD_FINAL],
        );
        let g = GenSummary::from_batch(&b).unwrap();
        assert_eq!(g.heavy_flavor, vec![1.0, 0.0, 0.0]);
        assert_eq!(g.light_flavor(), vec![0.0, 1.0, 1.0]);
        assert_eq!(g.max_z_pt, vec![0.0, 0.0, 300.0]);
    }

    #[test]
    fn boson_pt_takes_event_maximum() {
        // Two hard-process Ws in one event; the larger pt wins.
        let b = gen_batch(
            &[2, 1],
            vec![150.0, 250.0, 90.0],
            vec![24.0, -24.0, 24.0],
            vec![HARD_FINAL, HARD_FINAL, HARD_FINAL],
        );
        let g = GenSummary::from_batch(&b).unwrap();
        assert_eq!(g.max_w_pt, vec![250.0, 90.0]);
        assert_eq!(g.max_z_pt, vec![0.0, 0.0]);
    }

    #[test]
    fn top_pts_collected_in_order() {
        let b = gen_batch(
            &[2],
            vec![120.0, 80.0],
            vec![6.0, -6.0],
            vec![HARD_FINAL, HARD_FINAL],
        );
        let g = GenSummary::from_batch(&b).unwrap();
        assert_eq!(g.top_pts[0], vec![120.0, 80.0]);
    }

    #[test]
    fn missing_gen_table_yields_neutral_summary() {
        let b = EventBatch::new("WJets", 2, [], [], [], Some(vec![1.0, 1.0])).unwrap();
        let g = GenSummary::from_batch(&b).unwrap();
        assert_eq!(g.heavy_flavor, vec![0.0, 0.0]);
        assert!(g.top_pts[0].is_empty());
    }

    #[test]
    fn flavor_split_datasets() {
        assert!(wants_flavor_split("WJets_HT400"));
        assert!(wants_flavor_split("DYJetsToLL"));
        assert!(wants_flavor_split("ZJetsToNuNu"));
        assert!(!wants_flavor_split("TTJets"));
    }
}
