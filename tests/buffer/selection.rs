use std::time::Duration;

use wgpu_3dgs_mask_select::{SelectionBitset, buffer::SelectionBuffer};

use crate::common::TestContext;

const TIMEOUT: Duration = Duration::from_secs(10);

fn bitset(len: usize, selected: &[usize]) -> SelectionBitset {
    let mut bitset = SelectionBitset::new(len);
    selected.iter().for_each(|&i| bitset.set(i, true));
    bitset
}

#[test]
fn test_selection_buffer_new_should_hold_at_least_one_word() {
    let Some(ctx) = TestContext::try_new() else {
        return;
    };

    let empty = SelectionBuffer::new(&ctx.device, 0);
    let buffer = SelectionBuffer::new(&ctx.device, 33);

    assert!(empty.is_empty());
    assert_eq!(empty.buffer().size(), 4);
    assert_eq!(buffer.len(), 33);
    assert_eq!(buffer.buffer().size(), 8);
}

#[test]
fn test_selection_buffer_download_should_return_uploaded_bitset() {
    let Some(ctx) = TestContext::try_new() else {
        return;
    };
    let selection = bitset(70, &[0, 31, 32, 69]);

    let buffer = SelectionBuffer::new_with_bitset(&ctx.device, &selection);
    let downloaded =
        pollster::block_on(buffer.download(&ctx.device, &ctx.queue)).expect("download");

    assert_eq!(downloaded, selection);
}

#[test]
fn test_selection_buffer_update_should_fit_bitset_to_buffer() {
    let Some(ctx) = TestContext::try_new() else {
        return;
    };

    let buffer = SelectionBuffer::new(&ctx.device, 40);
    buffer.update(&ctx.queue, &bitset(100, &[1, 39, 40, 99]));
    let downloaded = buffer
        .download_blocking(&ctx.device, &ctx.queue, TIMEOUT)
        .expect("download");

    assert_eq!(downloaded, bitset(40, &[1, 39]));
}
