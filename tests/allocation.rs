use std::sync::Arc;

use gralloc::{
    AfbcModifiers, Allocator, AllocatorConfig, BlockCapabilities, BlockKind, BufferDescriptor,
    CapabilityMask, Error, FormatId, HeapArena, HeapKind, Usage, YuvInfo, formats,
};

const GPU_RT: Usage = Usage::GPU_RENDER_TARGET;
const GPU_TEX: Usage = Usage::GPU_TEXTURE;

fn desc(format: FormatId, width: u32, height: u32) -> BufferDescriptor {
    BufferDescriptor::new(format.raw() as u64, width, height)
}

fn gpu_afbc(extra: CapabilityMask) -> BlockCapabilities {
    BlockCapabilities {
        gpu: CapabilityMask::OPTIONS_PRESENT | CapabilityMask::AFBC_BASIC | extra,
        ..Default::default()
    }
}

#[test]
fn nv12_texture_is_uncompressed_two_plane() {
    let arena = Arc::new(HeapArena::new());
    let alloc = Allocator::new(AllocatorConfig::new(), arena.clone());
    let buffer = alloc
        .allocate(&[desc(FormatId::NV12, 1920, 1080).with_consumer_usage(GPU_TEX)])
        .unwrap()
        .remove(0);

    assert!(!buffer.alloc_type().is_afbc());
    assert_eq!(buffer.alloc_type().primary, BlockKind::Uncompressed);
    assert!(buffer.is_multi_plane());
    let planes = buffer.planes();
    assert_eq!(planes[0].offset, 0);
    assert_eq!(planes[0].byte_stride, 1920);
    assert_eq!(planes[1].offset, 1920 * 1080);
    assert_eq!(planes[1].byte_stride, 1920);
    assert_eq!(planes[1].alloc_height, 540);
    assert!(!planes[2].is_used());
    assert_eq!(buffer.size(), 1920 * 1080 * 3 / 2);
    assert_eq!(buffer.yuv_info(), Some(YuvInfo::Bt601Narrow));
}

#[test]
fn rgba_gpu_to_gpu_is_basic_tiled_afbc() {
    let arena = Arc::new(HeapArena::new());
    let alloc = Allocator::new(AllocatorConfig::new(), arena.clone())
        .with_capabilities(gpu_afbc(CapabilityMask::AFBC_TILED_HEADERS));
    let buffer = alloc
        .allocate(&[desc(FormatId::RGBA_8888, 256, 256)
            .with_producer_usage(GPU_RT)
            .with_consumer_usage(GPU_TEX)])
        .unwrap()
        .remove(0);

    assert_eq!(
        buffer.alloc_format().modifiers(),
        AfbcModifiers::BASIC | AfbcModifiers::TILED_HEADERS
    );
    let alloc_type = buffer.alloc_type();
    assert_eq!(alloc_type.primary, BlockKind::Basic);
    assert!(alloc_type.tiled_headers);
    assert!(!alloc_type.multi_plane);
    assert!(!buffer.is_multi_plane());

    // 256 superblocks: 4096 header bytes, 1024 body bytes each
    let header = (256usize * 16).div_ceil(1024) * 1024;
    assert_eq!(buffer.size(), header + 256 * 1024);
    assert_eq!(buffer.stride(), 0);
}

#[test]
fn zero_width_requests_no_memory() {
    let arena = Arc::new(HeapArena::new());
    let alloc = Allocator::new(AllocatorConfig::new(), arena.clone());
    for d in [desc(FormatId::RGBA_8888, 0, 64), desc(FormatId::RGBA_8888, 64, 0)] {
        assert!(matches!(
            alloc.allocate(&[d.with_consumer_usage(GPU_TEX)]),
            Err(Error::InvalidParameters(_))
        ));
    }
    assert_eq!(arena.allocation_count(), 0);
}

#[test]
fn overflowing_dimensions_are_invalid() {
    let arena = Arc::new(HeapArena::new());
    let alloc = Allocator::new(AllocatorConfig::new(), arena.clone());
    let huge = [
        desc(FormatId::NV12, u32::MAX, u32::MAX),
        desc(FormatId::RGBA_8888, 1 << 31, 1 << 31),
    ];
    for d in huge {
        assert!(matches!(
            alloc.allocate(&[d.with_consumer_usage(GPU_TEX)]),
            Err(Error::InvalidParameters(_))
        ));
    }

    let tiled = Allocator::new(AllocatorConfig::new(), arena.clone())
        .with_capabilities(gpu_afbc(CapabilityMask::AFBC_TILED_HEADERS));
    let afbc = desc(FormatId::RGBA_8888, u32::MAX, u32::MAX)
        .with_producer_usage(GPU_RT)
        .with_consumer_usage(GPU_TEX);
    assert!(matches!(tiled.allocate(&[afbc]), Err(Error::InvalidParameters(_))));
    assert_eq!(arena.allocation_count(), 0);
}

#[test]
fn unsatisfiable_size_is_exhaustion() {
    let arena = Arc::new(HeapArena::new());
    let alloc = Allocator::new(AllocatorConfig::new(), arena.clone());
    // representable, but far beyond any address space
    let d = desc(FormatId::RGBA_8888, 1 << 30, 1 << 30).with_consumer_usage(GPU_TEX);
    assert!(matches!(
        alloc.allocate(&[d]),
        Err(Error::AllocationExhausted { heap: HeapKind::System, .. })
    ));
    assert_eq!(arena.live_allocations(), 0);
}

#[test]
fn identical_batch_shares_one_allocation() {
    let arena = Arc::new(HeapArena::new());
    let alloc = Allocator::new(AllocatorConfig::new(), arena.clone());
    let d = desc(FormatId::RGBX_8888, 256, 256)
        .with_producer_usage(GPU_RT)
        .with_consumer_usage(GPU_TEX);
    let buffers = alloc.allocate(&[d, d, d]).unwrap();

    assert_eq!(arena.allocation_count(), 1);
    assert_eq!(arena.live_allocations(), 1);
    for b in &buffers {
        assert_eq!(b.backing_store_id(), buffers[0].backing_store_id());
        assert!(b.backing_store_size() >= b.size());
        assert_eq!(b.planes(), buffers[0].planes());
    }

    buffers[1].mapping().unwrap().write(4096, &[0xAB; 16]).unwrap();
    for b in &buffers {
        let mut read = [0u8; 16];
        b.mapping().unwrap().read(4096, &mut read).unwrap();
        assert_eq!(read, [0xAB; 16]);
    }

    for b in buffers {
        alloc.free(b).unwrap();
    }
    assert_eq!(arena.live_allocations(), 0);
}

#[test]
fn no_afbc_rejects_every_yuv_format() {
    let arena = Arc::new(HeapArena::new());
    let alloc = Allocator::new(AllocatorConfig::new(), arena.clone());
    let yuv: Vec<_> = formats::all().iter().filter(|f| f.is_yuv).collect();
    assert!(!yuv.is_empty());
    for info in yuv {
        let d = desc(info.id, 64, 64).with_consumer_usage(Usage::NO_AFBC);
        assert!(
            matches!(alloc.allocate(&[d]), Err(Error::UnsupportedFormat { .. })),
            "{}",
            info.id
        );
    }
    assert_eq!(arena.allocation_count(), 0);
}

#[test]
fn failed_batch_leaves_nothing_allocated() {
    let arena = Arc::new(HeapArena::new().fail_after(1));
    let alloc = Allocator::new(AllocatorConfig::new(), arena.clone());
    let system = desc(FormatId::RGBA_8888, 64, 64).with_consumer_usage(GPU_TEX);
    let composer = desc(FormatId::RGBA_8888, 64, 64).with_consumer_usage(Usage::COMPOSER_OVERLAY);

    assert!(matches!(
        alloc.allocate(&[system, composer]),
        Err(Error::AllocationExhausted { .. })
    ));
    assert_eq!(arena.live_allocations(), 0);
}

#[test]
fn preferred_heap_falls_back_to_system() {
    let arena = Arc::new(HeapArena::new().without_heap(HeapKind::Compound));
    let alloc = Allocator::new(AllocatorConfig::new(), arena.clone());
    let buffer = alloc
        .allocate(&[desc(FormatId::RGBA_8888, 64, 64).with_consumer_usage(Usage::COMPOSER_OVERLAY)])
        .unwrap()
        .remove(0);
    assert_eq!(buffer.heap(), HeapKind::System);
}

#[test]
fn secure_heap_never_falls_back() {
    let arena = Arc::new(HeapArena::new().without_heap(HeapKind::Secure));
    let alloc = Allocator::new(AllocatorConfig::new().with_secure_heap(true), arena.clone());
    let d = desc(FormatId::RGBA_8888, 64, 64).with_consumer_usage(Usage::PROTECTED | GPU_TEX);
    assert!(matches!(
        alloc.allocate(&[d]),
        Err(Error::AllocationExhausted { heap: HeapKind::Secure, .. })
    ));
    assert_eq!(arena.allocation_count(), 0);
}

#[test]
fn multi_plane_afbc_falls_back_to_single_plane() {
    let arena = Arc::new(HeapArena::new());
    let alloc = Allocator::new(AllocatorConfig::new(), arena.clone()).with_capabilities(gpu_afbc(
        CapabilityMask::empty(),
    ));
    let buffer = alloc
        .allocate(&[desc(FormatId::NV12, 64, 64)
            .with_producer_usage(GPU_RT)
            .with_consumer_usage(GPU_TEX)])
        .unwrap()
        .remove(0);

    // the selected format still names NV12; the layout is single-plane
    assert_eq!(buffer.internal_format().base(), FormatId::NV12);
    assert_eq!(buffer.alloc_format().base(), FormatId::YUV420_8BIT_I);
    assert!(buffer.alloc_format().modifiers().contains(AfbcModifiers::BASIC));
    assert!(!buffer.is_multi_plane());

    // subsampled header pointing at the body after 16 headers
    let mut word = [0u8; 4];
    buffer.mapping().unwrap().read(0, &mut word).unwrap();
    assert_eq!(u32::from_le_bytes(word), 1024 + (1 << 28));
}

#[test]
fn layout_resolution_is_deterministic() {
    let arena = Arc::new(HeapArena::new());
    let alloc = Allocator::new(AllocatorConfig::new(), arena.clone()).with_capabilities(gpu_afbc(
        CapabilityMask::AFBC_TILED_HEADERS | CapabilityMask::AFBC_WIDE_BLOCK,
    ));
    for info in formats::all() {
        let d = desc(info.id, 333, 97)
            .with_producer_usage(GPU_RT)
            .with_consumer_usage(GPU_TEX);
        let first = alloc.resolve(&d);
        let second = alloc.resolve(&d);
        assert_eq!(first, second, "{}", info.id);
    }
    assert_eq!(arena.allocation_count(), 0);
}

#[test]
fn size_grows_with_dimensions() {
    let alloc = Allocator::new(AllocatorConfig::new(), Arc::new(HeapArena::new()));
    for id in [FormatId::RGBA_8888, FormatId::NV12, FormatId::YV12, FormatId::RGB_565] {
        let mut last = 0;
        for side in [1u32, 15, 16, 17, 100, 255, 256, 257, 1000] {
            let d = desc(id, side, side)
                .with_producer_usage(Usage::CPU_WRITE_OFTEN)
                .with_consumer_usage(GPU_TEX);
            let size = alloc.resolve(&d).unwrap().size;
            assert!(size >= last, "{id} at {side}");
            last = size;
        }
    }
}

#[test]
fn layers_multiply_the_size() {
    let alloc = Allocator::new(AllocatorConfig::new(), Arc::new(HeapArena::new()));
    let one = desc(FormatId::RGBA_8888, 64, 64).with_consumer_usage(Usage::CPU_READ_OFTEN);
    let three = one.with_layer_count(3);
    let single = alloc.resolve(&one).unwrap();
    let layered = alloc.resolve(&three).unwrap();
    assert_eq!(layered.size, 3 * single.size);
    assert_eq!(layered.layer_offset(2), Some(2 * single.size));
    assert_eq!(layered.layer_offset(3), None);

    let buffer = alloc.allocate(&[three]).unwrap().remove(0);
    assert_eq!(buffer.layer_count(), 3);
    assert_eq!(buffer.size(), layered.size);
}

#[test]
fn blob_must_be_one_row() {
    let alloc = Allocator::new(AllocatorConfig::new(), Arc::new(HeapArena::new()));
    let ok = desc(FormatId::BLOB, 4096, 1).with_producer_usage(Usage::CPU_WRITE_OFTEN);
    assert_eq!(alloc.allocate(&[ok]).unwrap()[0].size(), 4096);
    let bad = desc(FormatId::BLOB, 4096, 2).with_producer_usage(Usage::CPU_WRITE_OFTEN);
    assert!(matches!(alloc.allocate(&[bad]), Err(Error::InvalidParameters(_))));
}

#[test]
fn yuv_colour_space_follows_usage() {
    let alloc = Allocator::new(AllocatorConfig::new(), Arc::new(HeapArena::new()));
    let d = desc(FormatId::NV12, 64, 64)
        .with_consumer_usage(Usage::CPU_READ_OFTEN.with_yuv_color_space_selector(2));
    let buffer = alloc.allocate(&[d]).unwrap().remove(0);
    assert_eq!(buffer.yuv_info(), Some(YuvInfo::Bt709Narrow));

    let rgb = desc(FormatId::RGBA_8888, 64, 64).with_consumer_usage(Usage::CPU_READ_OFTEN);
    assert_eq!(alloc.allocate(&[rgb]).unwrap()[0].yuv_info(), None);
}
