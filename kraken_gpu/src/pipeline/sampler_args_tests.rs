//! Unit tests for the sampler argument buffer cache

use std::sync::Arc;

use crate::device::HeadlessDevice;
use crate::pipeline::SamplerArgumentCache;
use crate::texture::SamplerState;

fn samplers(count: usize) -> Vec<SamplerState> {
    (0..count)
        .map(|i| {
            if i % 2 == 0 {
                SamplerState::FILTER_LINEAR | SamplerState::REPEAT_S
            } else {
                SamplerState::MIPMAP | SamplerState::CLAMP_BORDER
            }
        })
        .collect()
}

#[test]
fn test_identical_sampler_sets_share_encoding() {
    let device = HeadlessDevice::new();
    let mut cache = SamplerArgumentCache::new();

    let set = samplers(20);
    let a = cache.bake_or_get(device.as_ref(), &set).unwrap();
    let b = cache.bake_or_get(device.as_ref(), &set).unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(device.sampler_encode_count(), 1);
}

#[test]
fn test_key_is_order_sensitive() {
    // The encoded table is indexed positionally, so a reordered set is a
    // different encoding.
    let device = HeadlessDevice::new();
    let mut cache = SamplerArgumentCache::new();

    let forward = samplers(4);
    let mut reversed = forward.clone();
    reversed.reverse();

    cache.bake_or_get(device.as_ref(), &forward).unwrap();
    cache.bake_or_get(device.as_ref(), &reversed).unwrap();
    assert_eq!(device.sampler_encode_count(), 2);
}

#[test]
fn test_eviction_bounded_and_skips_held_entries() {
    let device = HeadlessDevice::new();
    let mut cache = SamplerArgumentCache::with_capacity(1);

    // Hold the first encoding as an in-flight command buffer would
    let held = cache.bake_or_get(device.as_ref(), &samplers(2)).unwrap();
    cache.bake_or_get(device.as_ref(), &samplers(3)).unwrap();

    // Held entry survives; the cache overshoots rather than freeing it
    assert_eq!(cache.len(), 2);
    let again = cache.bake_or_get(device.as_ref(), &samplers(2)).unwrap();
    assert!(Arc::ptr_eq(&held, &again));

    // Once released, the earlier entries are evictable again
    drop(held);
    drop(again);
    cache.bake_or_get(device.as_ref(), &samplers(4)).unwrap();
    assert_eq!(cache.len(), 1);
}
