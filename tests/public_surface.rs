//! Device-free checks over the crate's public surface.
//!
//! Everything here runs without a Vulkan instance, so the suite passes on
//! headless CI: it exercises handle plumbing, the upload writer's pending
//! state, startup defaults, and the POD types callers pack into GPU buffers,
//! exactly as an external consumer of the library sees them.
//!
//! # Running This Test
//!
//! ```bash
//! cargo test --test public_surface
//! ```

use lumina_gpu::{
    BufferUsage, BufferWriter, DrawIndirectArgs, EngineConfig, Pool, PresentMode, TextureUsage,
    FRAMES_IN_FLIGHT,
};

/// Wire `log` output into the test harness.
fn init_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .is_test(true)
        .try_init();
}

#[test]
fn test_pool_checkout_through_public_surface() {
    init_logging();

    let mut pool: Pool<u32> = Pool::new("surface test");
    let handle = pool.insert(7).unwrap();
    log::info!("pool issued handle index {}", handle.index());

    assert_eq!(pool.get(handle), Some(&7));
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.take(handle), Some(7));
    // A taken handle is dead; a second take is a no-op.
    assert_eq!(pool.take(handle), None);
    assert!(pool.is_empty());
}

#[test]
fn test_writer_starts_empty() {
    init_logging();

    let writer = BufferWriter::new();
    assert!(writer.is_empty());
    assert_eq!(writer.pending_writes(), 0);
}

#[test]
fn test_startup_defaults() {
    init_logging();

    let config = EngineConfig::default();
    log::info!("default config: {:?}", config);
    assert_eq!(config.present_mode, PresentMode::Fifo);
    assert_eq!(FRAMES_IN_FLIGHT, 2);
}

#[test]
fn test_usage_flags_compose() {
    init_logging();

    let usage = TextureUsage::STORAGE | TextureUsage::COPY_SRC;
    assert!(usage.contains(TextureUsage::STORAGE));
    assert!(!usage.contains(TextureUsage::COLOR_ATTACHMENT));

    let usage = BufferUsage::VERTEX | BufferUsage::INDIRECT;
    assert!(usage.contains(BufferUsage::INDIRECT));
}

#[test]
fn test_indirect_args_pack_into_upload_bytes() {
    init_logging();

    // The shape a caller hands to the writer when filling an indirect buffer.
    let draws = vec![
        DrawIndirectArgs {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        },
        DrawIndirectArgs {
            vertex_count: 6,
            instance_count: 4,
            first_vertex: 3,
            first_instance: 1,
        },
    ];
    let bytes: &[u8] = bytemuck::cast_slice(&draws);
    assert_eq!(bytes.len(), 2 * std::mem::size_of::<DrawIndirectArgs>());

    let back: &[DrawIndirectArgs] = bytemuck::cast_slice(bytes);
    assert_eq!(back[1].instance_count, 4);
}
