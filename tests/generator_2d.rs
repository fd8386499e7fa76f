//! Serial topology checks for generated 2D domains.

use patch_forest::prelude::*;

/// 2x2 base grid with the south-west patch refined once more.
fn mixed_forest() -> QuadForest {
    let mut forest = QuadForest::new();
    forest.refine_all();
    forest.refine_cells(&[TreeCell {
        level: 1,
        coords: [0, 0],
    }]);
    forest
}

fn generate(forest: QuadForest) -> TreeDomainGenerator<2> {
    TreeDomainGenerator::new(forest, GeneratorOpts::default(), &NoComm).unwrap()
}

/// Every relationship must read the same from both ends.
fn check_side_symmetry(domain: &Domain<2>) {
    for patch in domain.patch_infos() {
        for side in Side::<2>::all() {
            match patch.side_nbr(side) {
                None => {}
                Some(NbrInfo::Normal(info)) => {
                    let nbr = domain.patch_by_id(info.id).unwrap();
                    let back = nbr.normal_nbr_info(side.opposite());
                    assert_eq!(back.id, patch.id);
                }
                Some(NbrInfo::Coarse(info)) => {
                    let nbr = domain.patch_by_id(info.id).unwrap();
                    let back = nbr.fine_nbr_info(side.opposite());
                    assert_eq!(back.ids[info.orth_on_coarse], patch.id);
                }
                Some(NbrInfo::Fine(info)) => {
                    for (slot, &fid) in info.ids.iter().enumerate() {
                        let nbr = domain.patch_by_id(fid).unwrap();
                        let back = nbr.coarse_nbr_info(side.opposite());
                        assert_eq!(back.id, patch.id);
                        assert_eq!(back.orth_on_coarse, slot);
                    }
                }
            }
        }
        for corner in Corner::<2>::all() {
            match patch.corner_nbr(corner) {
                None => {}
                Some(NbrInfo::Normal(info)) => {
                    let nbr = domain.patch_by_id(info.id).unwrap();
                    match nbr.corner_nbr(corner.opposite()) {
                        Some(NbrInfo::Normal(back)) => assert_eq!(back.id, patch.id),
                        other => panic!("asymmetric corner: {other:?}"),
                    }
                }
                Some(NbrInfo::Coarse(info)) => {
                    let nbr = domain.patch_by_id(info.id).unwrap();
                    match nbr.corner_nbr(corner.opposite()) {
                        Some(NbrInfo::Fine(back)) => assert_eq!(back.ids, vec![patch.id]),
                        other => panic!("asymmetric corner: {other:?}"),
                    }
                }
                Some(NbrInfo::Fine(info)) => {
                    assert_eq!(info.ids.len(), 1);
                    let nbr = domain.patch_by_id(info.ids[0]).unwrap();
                    match nbr.corner_nbr(corner.opposite()) {
                        Some(NbrInfo::Coarse(back)) => assert_eq!(back.id, patch.id),
                        other => panic!("asymmetric corner: {other:?}"),
                    }
                }
            }
        }
    }
}

#[test]
fn mixed_forest_side_and_corner_symmetry() {
    let mut generator = generate(mixed_forest());
    let mut domain = Some(generator.finest_domain());
    while let Some(d) = domain {
        check_side_symmetry(&d);
        domain = generator.coarser_domain();
    }
}

#[test]
fn level_patch_counts() {
    let mut generator = generate(mixed_forest());
    // 3 coarse patches + 4 children of the SW patch.
    assert_eq!(generator.finest_domain().num_global_patches(), 7);
    // Deepest siblings collapse, the rest carry over.
    assert_eq!(generator.coarser_domain().unwrap().num_global_patches(), 4);
    assert_eq!(generator.coarser_domain().unwrap().num_global_patches(), 1);
    assert!(generator.coarser_domain().is_none());
}

#[test]
fn parent_child_round_trip() {
    let mut generator = generate(mixed_forest());
    let fine = generator.finest_domain();
    let coarse = generator.coarser_domain().unwrap();
    for patch in fine.patch_infos() {
        let parent_id = patch.parent_id.unwrap();
        let parent = coarse.patch_by_id(parent_id).unwrap();
        if patch.orth_on_parent.is_null() {
            // Carried over: its own child in slot 0.
            assert_eq!(parent_id, patch.id);
            assert_eq!(parent.child_ids[0], Some(patch.id));
        } else {
            let slot = patch.orth_on_parent.index();
            assert_eq!(parent.child_ids[slot], Some(patch.id));
        }
    }
    // The coarsened parent covers exactly its children's footprint.
    for patch in coarse.patch_infos() {
        if patch.child_ids[0] == Some(patch.id) {
            continue;
        }
        for orthant in Orthant::<2>::all() {
            let child_id = patch.child_ids[orthant.index()].unwrap();
            let child = fine.patch_by_id(child_id).unwrap();
            for axis in 0..2 {
                let half = patch.spacings[axis] * patch.ns[axis] as f64 / 2.0;
                let expected = patch.starts[axis]
                    + if orthant.is_upper(axis) { half } else { 0.0 };
                assert!((child.starts[axis] - expected).abs() < 1e-14);
            }
        }
    }
}

#[test]
fn fine_nbr_array_is_ordered_by_collapsed_slot() {
    let mut generator = generate(mixed_forest());
    let domain = generator.finest_domain();

    // Patch east of the refined SW quadrant.
    let east = domain
        .patch_by_id(
            TreeCell {
                level: 1,
                coords: [1, 0],
            }
            .patch_id(),
        )
        .unwrap();
    let info = east.fine_nbr_info(Side::west());
    let lower = TreeCell {
        level: 2,
        coords: [1, 0],
    }
    .patch_id();
    let upper = TreeCell {
        level: 2,
        coords: [1, 1],
    }
    .patch_id();
    assert_eq!(info.ids, vec![lower, upper]);

    // And the mirror views carry the matching collapsed slots.
    assert_eq!(
        domain
            .patch_by_id(lower)
            .unwrap()
            .coarse_nbr_info(Side::east())
            .orth_on_coarse,
        0
    );
    assert_eq!(
        domain
            .patch_by_id(upper)
            .unwrap()
            .coarse_nbr_info(Side::east())
            .orth_on_coarse,
        1
    );
}

#[test]
fn physical_boundaries_have_no_nbrs() {
    let mut generator = generate(mixed_forest());
    let domain = generator.finest_domain();
    let sw_child = domain
        .patch_by_id(
            TreeCell {
                level: 2,
                coords: [0, 0],
            }
            .patch_id(),
        )
        .unwrap();
    assert!(!sw_child.has_nbr(Side::west()));
    assert!(!sw_child.has_nbr(Side::south()));
    assert!(sw_child.has_nbr(Side::east()));
    assert!(sw_child.has_nbr(Side::north()));
    assert!(!sw_child.has_corner_nbr(Corner::from_index(0)));
}

#[test]
fn global_indexes_are_dense_and_match_local_order() {
    let mut generator = generate(mixed_forest());
    let domain = generator.finest_domain();
    let mut gids: Vec<usize> = domain
        .patch_infos()
        .iter()
        .map(|p| p.global_index)
        .collect();
    gids.sort_unstable();
    assert_eq!(gids, (0..7).collect::<Vec<_>>());
    for (li, patch) in domain.patch_infos().iter().enumerate() {
        assert_eq!(patch.local_index, li);
        assert_eq!(domain.local_index_of(patch.id), Some(li));
    }
}
