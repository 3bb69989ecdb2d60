use wgpu_3dgs_mask_select::{SelectionBitset, SetOp, SharedSelection};

fn bitset(len: usize, selected: &[usize]) -> SelectionBitset {
    let mut bitset = SelectionBitset::new(len);
    selected.iter().for_each(|&i| bitset.set(i, true));
    bitset
}

#[test]
fn test_selection_bitset_new_should_be_empty() {
    let bitset = SelectionBitset::new(70);

    assert_eq!(bitset.len(), 70);
    assert_eq!(bitset.words().len(), 3);
    assert_eq!(bitset.count_selected(), 0);
    assert!(SelectionBitset::new(0).is_empty());
}

#[test]
fn test_selection_bitset_set_should_ignore_out_of_range() {
    let mut bitset = SelectionBitset::new(33);

    bitset.set(32, true);
    bitset.set(33, true);
    bitset.set(1000, true);

    assert!(bitset.contains(32));
    assert!(!bitset.contains(33));
    assert_eq!(bitset.count_selected(), 1);
}

#[test]
fn test_selection_bitset_select_all_and_invert_should_keep_tail_clear() {
    let mut bitset = SelectionBitset::new(37);

    bitset.select_all();
    assert_eq!(bitset.count_selected(), 37);
    assert_eq!(bitset.words()[1], 0b11111);

    bitset.set(3, false);
    bitset.invert();
    assert_eq!(bitset.iter_selected().collect::<Vec<_>>(), vec![3]);

    bitset.clear_all();
    assert_eq!(bitset.count_selected(), 0);
}

#[test]
fn test_selection_bitset_from_words_should_drop_bits_past_length() {
    let bitset = SelectionBitset::from_words(vec![u32::MAX, u32::MAX, u32::MAX], 40);

    assert_eq!(bitset.words().len(), 2);
    assert_eq!(bitset.count_selected(), 40);
    assert_eq!(
        SelectionBitset::from_words(vec![], 40),
        SelectionBitset::new(40)
    );
}

#[test]
fn test_selection_bitset_apply_should_merge_with_set_ops() {
    let base = bitset(100, &[1, 2, 3, 64]);
    let decision = bitset(100, &[3, 4, 99]);

    let mut replaced = base.clone();
    replaced.apply(&decision, SetOp::Replace);
    let mut added = base.clone();
    added.apply(&decision, SetOp::Add);
    let mut subtracted = base.clone();
    subtracted.apply(&decision, SetOp::Subtract);

    assert_eq!(replaced, decision);
    assert_eq!(
        added.iter_selected().collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 64, 99]
    );
    assert_eq!(subtracted.iter_selected().collect::<Vec<_>>(), vec![1, 2, 64]);
}

#[test]
fn test_selection_bitset_apply_should_restore_after_add_then_subtract_of_disjoint_decision() {
    let base = bitset(50, &[0, 10, 20]);
    let decision = bitset(50, &[5, 15, 49]);

    let mut selection = base.clone();
    selection.apply(&decision, SetOp::Add);
    selection.apply(&decision, SetOp::Subtract);

    assert_eq!(selection, base);
}

#[test]
fn test_selection_bitset_apply_should_replace_like_clear_then_add() {
    let base = bitset(50, &[0, 10, 20]);
    let decision = bitset(50, &[10, 30]);

    let mut replaced = base.clone();
    replaced.apply(&decision, SetOp::Replace);
    let mut cleared = base.clone();
    cleared.clear_all();
    cleared.apply(&decision, SetOp::Add);

    assert_eq!(replaced, cleared);
}

#[test]
fn test_selection_bitset_apply_should_take_decision_length() {
    let mut selection = bitset(10, &[1, 9]);
    let decision = bitset(40, &[35]);

    selection.apply(&decision, SetOp::Add);

    assert_eq!(selection.len(), 40);
    assert_eq!(selection.iter_selected().collect::<Vec<_>>(), vec![1, 9, 35]);

    selection.apply(&bitset(5, &[]), SetOp::Add);
    assert_eq!(selection.iter_selected().collect::<Vec<_>>(), vec![1]);
}

#[test]
fn test_selection_bitset_retain_unselected_should_keep_order() {
    let selection = bitset(5, &[0, 2, 3]);
    let mut items = vec!['a', 'b', 'c', 'd', 'e', 'f'];

    selection.retain_unselected(&mut items);

    assert_eq!(items, vec!['b', 'e', 'f']);
}

#[test]
fn test_selection_bitset_from_bools_should_match_set() {
    let bitset = SelectionBitset::from_bools(&[true, false, true]);

    assert_eq!(bitset.iter_selected().collect::<Vec<_>>(), vec![0, 2]);
}

#[test]
fn test_shared_selection_update_should_publish_new_snapshot() {
    let shared = SharedSelection::new(SelectionBitset::new(8));
    let before = shared.snapshot();

    let count = shared.update(|selection| {
        selection.set(2, true);
        selection.count_selected()
    });

    assert_eq!(count, 1);
    assert_eq!(before.count_selected(), 0);
    assert_eq!(shared.count_selected(), 1);
    assert!(shared.snapshot().contains(2));
}

#[test]
fn test_shared_selection_should_serve_concurrent_readers() {
    let shared = SharedSelection::new(SelectionBitset::new(64));

    std::thread::scope(|scope| {
        let readers = (0..4)
            .map(|_| {
                let shared = shared.clone();
                scope.spawn(move || {
                    (0..100)
                        .map(|_| shared.snapshot().count_selected())
                        .all(|count| count == 0 || count == 64)
                })
            })
            .collect::<Vec<_>>();

        for _ in 0..10 {
            shared.update(SelectionBitset::select_all);
            shared.update(SelectionBitset::clear_all);
        }

        assert!(readers.into_iter().all(|r| r.join().expect("reader")));
    });
}
