//! Area-averaging resampler, best-source selection and compositing.

use log::{debug, trace};

use crate::cache::{CacheInner, ImageHandle, SetId};
use crate::hash::ContentKey;
use crate::image_set::ImageSet;
use crate::picture::Picture;
use crate::rect::Rect;

/// Fixed-point precision of the area filter. 12 fractional bits are enough
/// for exact per-pixel coverage at any realistic image size.
const FIX: u32 = 12;
const FIX_ONE: u64 = 1 << FIX;

/// Aspect ratios closer than this are considered equal.
const ASPECT_TOLERANCE: f64 = 1e-7;

/// Largest size with the source's aspect ratio that fits inside the
/// `bound_w` x `bound_h` box. Width is fixed first; if the derived height
/// overflows the box, height is fixed instead. Never returns a zero axis.
#[must_use]
pub fn fit_size(src_w: u32, src_h: u32, bound_w: u32, bound_h: u32) -> (u32, u32) {
    assert!(src_w > 0 && src_h > 0, "zero-sized source {src_w}x{src_h}");
    assert!(bound_w > 0 && bound_h > 0, "zero-sized bound {bound_w}x{bound_h}");
    let out_h = ((u64::from(bound_w) * u64::from(src_h) + u64::from(src_w) / 2)
        / u64::from(src_w)) as u32;
    if out_h > bound_h {
        let out_w = ((u64::from(bound_h) * u64::from(src_w) + u64::from(src_h) / 2)
            / u64::from(src_h)) as u32;
        (out_w.max(1), bound_h)
    } else {
        (bound_w, out_h.max(1))
    }
}

/// Scales `src` to fit the `dst_w` x `dst_h` box, preserving aspect ratio.
///
/// Returns `None` when the fitted size equals the source size: no resample
/// happens and the caller reuses the source picture directly.
#[must_use]
pub fn resample(src: &Picture, dst_w: u32, dst_h: u32) -> Option<Picture> {
    let (out_w, out_h) = fit_size(src.width(), src.height(), dst_w, dst_h);
    if out_w == src.width() && out_h == src.height() {
        return None;
    }
    trace!(
        "resampling {}x{} -> {out_w}x{out_h}",
        src.width(),
        src.height()
    );
    Some(area_average(src, out_w, out_h))
}

/// True area-weighted average in 20.12 fixed point.
///
/// Every destination pixel covers an exact source-space rectangle; each
/// overlapped source pixel contributes each channel weighted by its
/// fractional overlap area. Unlike point sampling or bilinear filtering this
/// stays moire-free on large shrink ratios.
fn area_average(src: &Picture, dst_w: u32, dst_h: u32) -> Picture {
    let src_w = src.width() as usize;
    let src_h = src.height() as usize;
    // A ratio of zero only occurs past a 4096x upscale; clamp so the
    // accumulation below always has weight.
    let ratio_x = ((u64::from(src.width()) << FIX) / u64::from(dst_w)).max(1);
    let ratio_y = ((u64::from(src.height()) << FIX) / u64::from(dst_h)).max(1);
    let pixels = src.pixels();
    let mut out = Vec::with_capacity(dst_w as usize * dst_h as usize);

    let mut top = 0u64;
    for _ in 0..dst_h {
        let bottom = top + ratio_y;
        let mut left = 0u64;
        for _ in 0..dst_w {
            let right = left + ratio_x;
            let (mut r, mut g, mut b, mut a) = (0u64, 0u64, 0u64, 0u64);
            let mut total = 0u64;

            let mut sy = top >> FIX;
            while sy * FIX_ONE < bottom {
                let cell_top = sy * FIX_ONE;
                let portion_y = bottom.min(cell_top + FIX_ONE) - top.max(cell_top);
                let row = (sy as usize).min(src_h - 1) * src_w;
                let mut sx = left >> FIX;
                while sx * FIX_ONE < right {
                    let cell_left = sx * FIX_ONE;
                    let portion_x = right.min(cell_left + FIX_ONE) - left.max(cell_left);
                    let weight = portion_x * portion_y;
                    let px = pixels[row + (sx as usize).min(src_w - 1)];
                    r += weight * u64::from(px & 0xff);
                    g += weight * u64::from((px >> 8) & 0xff);
                    b += weight * u64::from((px >> 16) & 0xff);
                    a += weight * u64::from(px >> 24);
                    total += weight;
                    sx += 1;
                }
                sy += 1;
            }

            let half = total / 2;
            let px = ((r + half) / total)
                | (((g + half) / total) << 8)
                | (((b + half) / total) << 16)
                | (((a + half) / total) << 24);
            out.push(px as u32);
            left = right;
        }
        top = bottom;
    }
    Picture::from_vec(dst_w, dst_h, out)
}

/// Index of the original best suited as a resampling source for the target
/// size.
///
/// Distance is squared per-axis difference, with upscaling penalized twice
/// as heavily as downscaling. A candidate whose aspect ratio matches the
/// target is preferred over a globally closer one that would distort. Ties
/// break on list order.
pub(crate) fn best_original_for(set: &ImageSet, target_w: u32, target_h: u32) -> usize {
    let target_aspect = f64::from(target_w) / f64::from(target_h);
    let mut best: Option<(usize, u64)> = None;
    let mut best_aspect: Option<(usize, u64)> = None;
    for (i, o) in set.originals.iter().enumerate() {
        let wd = axis_distance(o.width(), target_w);
        let hd = axis_distance(o.height(), target_h);
        let d = wd * wd + hd * hd;
        if best.is_none_or(|(_, bd)| d < bd) {
            best = Some((i, d));
        }
        let aspect = f64::from(o.width()) / f64::from(o.height());
        if (aspect - target_aspect).abs() < ASPECT_TOLERANCE
            && best_aspect.is_none_or(|(_, bd)| d < bd)
        {
            best_aspect = Some((i, d));
        }
    }
    best_aspect
        .or(best)
        .expect("image set holds at least one original")
        .0
}

fn axis_distance(have: u32, want: u32) -> u64 {
    if have >= want {
        u64::from(have - want)
    } else {
        u64::from(want - have) * 2
    }
}

/// Source-over blend of one pixel. `alpha` multiplies the source's own
/// per-pixel alpha uniformly; channels are non-premultiplied.
fn blend(bg: u32, fg: u32, alpha: u8) -> u32 {
    let src_a = fg >> 24;
    let m = (src_a * u32::from(alpha) / 255) as i32;
    if m == 0 {
        return bg;
    }
    let mut out = 0u32;
    for shift in [0, 8, 16, 24] {
        let f = ((fg >> shift) & 0xff) as i32;
        let b = ((bg >> shift) & 0xff) as i32;
        let c = b + (f - b) * m / 255;
        out |= (c as u32) << shift;
    }
    out
}

/// Blends `src` into `dst`, centered inside `area` and clipped to both the
/// area and the destination bounds.
pub(crate) fn composite(
    dst: &mut [u32],
    dst_w: u32,
    dst_h: u32,
    area: Rect,
    src: &Picture,
    alpha: u8,
) {
    let (ox, oy) = area.centered_origin(src.width(), src.height());
    let x0 = i64::from(ox).max(i64::from(area.x)).max(0);
    let y0 = i64::from(oy).max(i64::from(area.y)).max(0);
    let x1 = (i64::from(ox) + i64::from(src.width()))
        .min(area.right())
        .min(i64::from(dst_w));
    let y1 = (i64::from(oy) + i64::from(src.height()))
        .min(area.bottom())
        .min(i64::from(dst_h));
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let pixels = src.pixels();
    for y in y0..y1 {
        let src_row = (y - i64::from(oy)) as usize * src.width() as usize;
        let dst_row = y as usize * dst_w as usize;
        for x in x0..x1 {
            let fg = pixels[src_row + (x - i64::from(ox)) as usize];
            let cell = &mut dst[dst_row + x as usize];
            *cell = blend(*cell, fg, alpha);
        }
    }
}

/// Picks or produces the picture used to satisfy a draw and composites it.
/// May mutate the cache: MRU touches, insertions, evictions and merges.
fn draw_into(
    inner: &mut CacheInner,
    set_id: SetId,
    dst: &mut [u32],
    dst_w: u32,
    dst_h: u32,
    area: Rect,
    alpha: u8,
) {
    let target_dim = area.width.max(area.height);

    // An original whose dominant axis matches is authoritative. Aspect ratio
    // is preserved throughout, so matching only that axis suffices.
    if let Some(i) = inner.set(set_id).find_original_by_max_dim(target_dim) {
        trace!("draw: original hit for target {target_dim}");
        composite(dst, dst_w, dst_h, area, &inner.set(set_id).originals[i], alpha);
        return;
    }

    if let Some(i) = inner.set(set_id).find_resized_by_max_dim(target_dim) {
        trace!("draw: resized hit for target {target_dim}");
        inner.set_mut(set_id).touch_resized(i);
        composite(dst, dst_w, dst_h, area, &inner.set(set_id).resized[0], alpha);
        return;
    }

    let best = best_original_for(inner.set(set_id), area.width, area.height);

    // When the area's smaller axis constrains the fit, the cached picture's
    // dominant axis never equals the area's, so the probe above misses every
    // time. Probe again by the exact size the resample would produce.
    let (fit_w, fit_h) = {
        let src = &inner.set(set_id).originals[best];
        fit_size(src.width(), src.height(), area.width, area.height)
    };
    if let Some(i) = inner.set(set_id).find_resized_of_size(fit_w, fit_h) {
        trace!("draw: resized hit for fitted size {fit_w}x{fit_h}");
        inner.set_mut(set_id).touch_resized(i);
        composite(dst, dst_w, dst_h, area, &inner.set(set_id).resized[0], alpha);
        return;
    }

    let src = &inner.set(set_id).originals[best];
    let Some(scaled) = resample(src, area.width, area.height) else {
        // Fitted size equals the source; reuse it as-is.
        trace!("draw: best original already at target size");
        composite(dst, dst_w, dst_h, area, &inner.set(set_id).originals[best], alpha);
        return;
    };

    let key = scaled.key();
    match inner.content_owner(&key) {
        Some(owner) if owner != set_id => {
            // Another set already tracks this exact content: the two sets
            // are the same logical image. Merge and reuse its copy.
            debug!("draw: resample collided with another set, merging");
            let survivor = inner.merge(set_id, owner);
            composite_tracked(inner, survivor, &key, dst, dst_w, dst_h, area, alpha);
        }
        Some(_) => {
            composite_tracked(inner, set_id, &key, dst, dst_w, dst_h, area, alpha);
        }
        None => {
            if inner.max_resized() == 0 {
                // Derived caching disabled: use once, never track.
                composite(dst, dst_w, dst_h, area, &scaled, alpha);
            } else {
                inner.evict_resized_if_full(set_id);
                inner.register_picture(key, set_id);
                inner.set_mut(set_id).resized.push_front(scaled);
                debug!(
                    "draw: cached resized picture, {} now held",
                    inner.set(set_id).resized.len()
                );
                composite(dst, dst_w, dst_h, area, &inner.set(set_id).resized[0], alpha);
            }
        }
    }
}

/// Composites a picture already tracked by `set_id`, touching it in the MRU
/// order when it lives in the resized list.
fn composite_tracked(
    inner: &mut CacheInner,
    set_id: SetId,
    key: &ContentKey,
    dst: &mut [u32],
    dst_w: u32,
    dst_h: u32,
    area: Rect,
    alpha: u8,
) {
    if let Some(i) = inner
        .set(set_id)
        .originals
        .iter()
        .position(|p| p.key() == *key)
    {
        composite(dst, dst_w, dst_h, area, &inner.set(set_id).originals[i], alpha);
        return;
    }
    let i = inner
        .set(set_id)
        .resized
        .iter()
        .position(|p| p.key() == *key)
        .expect("tracked picture present in its owning set");
    inner.set_mut(set_id).touch_resized(i);
    composite(dst, dst_w, dst_h, area, &inner.set(set_id).resized[0], alpha);
}

impl ImageHandle {
    /// Renders this logical image into `dst` (a `dst_w` x `dst_h` RGBA
    /// buffer), scaled to fit `area` and centered inside it, blending
    /// source-over with `alpha` as a uniform multiplier on the source's own
    /// alpha channel.
    ///
    /// Reuses an exact-size original or cached resized picture when one
    /// exists, otherwise resamples from the best-fitting original and caches
    /// the result subject to the cache's `max_resized` bound.
    pub fn draw(&self, dst: &mut [u32], dst_w: u32, dst_h: u32, area: Rect, alpha: u8) {
        assert_eq!(
            dst.len(),
            dst_w as usize * dst_h as usize,
            "destination buffer length does not match {dst_w}x{dst_h}"
        );
        if area.width == 0 || area.height == 0 {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        let set_id = inner.set_of(self.id);
        draw_into(&mut inner, set_id, dst, dst_w, dst_h, area, alpha);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn pic(w: u32, h: u32, pixels: &[u32]) -> Picture {
        Picture::from_pixels(w, h, pixels)
    }

    #[test]
    fn fit_size_limits_on_the_tight_axis() {
        assert_eq!(fit_size(64, 64, 32, 16), (16, 16));
        assert_eq!(fit_size(100, 50, 50, 50), (50, 25));
        assert_eq!(fit_size(50, 100, 50, 50), (25, 50));
        assert_eq!(fit_size(64, 64, 32, 32), (32, 32));
    }

    #[test]
    fn fit_size_never_collapses_an_axis() {
        let (w, h) = fit_size(1000, 1, 10, 10);
        assert_eq!((w, h), (10, 1));
        let (w, h) = fit_size(1, 1000, 10, 10);
        assert_eq!((w, h), (1, 10));
    }

    #[test]
    fn resample_is_a_noop_at_the_source_size() {
        let src = pic(8, 8, &[0x1122_3344; 64]);
        assert!(resample(&src, 8, 8).is_none());
    }

    #[test]
    fn area_average_of_full_cells() {
        // 2x2 -> 1x1: plain average of the four pixels, per channel.
        let src = pic(2, 2, &[10, 20, 30, 40]);
        let out = resample(&src, 1, 1).unwrap();
        assert_eq!(out.pixels(), &[25]);
    }

    #[test]
    fn area_average_weights_partial_cells() {
        // 3x1 -> 2x1: each output covers 1.5 source pixels.
        let src = pic(3, 1, &[30, 60, 90]);
        let out = resample(&src, 2, 1).unwrap();
        // (30*1 + 60*0.5) / 1.5 = 40, (60*0.5 + 90*1) / 1.5 = 80
        assert_eq!(out.pixels(), &[40, 80]);
    }

    #[test]
    fn area_average_handles_all_channels() {
        let a = 0xff64_3208u32; // a=255 b=100 g=50 r=8
        let b = 0x0100_0a02u32; // a=1 b=0 g=10 r=2
        let src = pic(2, 1, &[a, b]);
        let out = resample(&src, 1, 1).unwrap();
        assert_eq!(out.pixels(), &[0x8032_1e05]);
    }

    #[test]
    fn aspect_ratio_survives_resampling() {
        let src = pic(100, 60, &[0xff00_0000; 6000]);
        let out = resample(&src, 40, 40).unwrap();
        assert_eq!((out.width(), out.height()), (40, 24));
        let src_ratio = 100.0 / 60.0;
        let out_ratio = f64::from(out.width()) / f64::from(out.height());
        assert!((src_ratio - out_ratio).abs() < 0.05);
    }

    fn set_with(originals: Vec<Picture>) -> ImageSet {
        let mut set = ImageSet::new();
        set.originals = VecDeque::from(originals);
        set
    }

    #[test]
    fn best_original_prefers_the_closest_size() {
        let set = set_with(vec![
            pic(64, 64, &[0; 4096]),
            pic(32, 32, &[0; 1024]),
        ]);
        assert_eq!(best_original_for(&set, 30, 30), 1);
    }

    #[test]
    fn best_original_penalizes_upscaling() {
        // 24x24 must be doubled to reach 48; 80x80 only shrinks. The upscale
        // penalty makes the larger source cheaper despite the bigger gap.
        let set = set_with(vec![
            pic(24, 24, &[0; 576]),
            pic(80, 80, &[0; 6400]),
        ]);
        assert_eq!(best_original_for(&set, 48, 48), 1);
    }

    #[test]
    fn best_original_prefers_matching_aspect() {
        // 32x32 is closer by distance, but 60x30 matches the 2:1 target.
        let set = set_with(vec![
            pic(60, 30, &[0; 1800]),
            pic(32, 32, &[0; 1024]),
        ]);
        assert_eq!(best_original_for(&set, 40, 20), 0);
    }

    #[test]
    fn best_original_breaks_ties_on_list_order() {
        // Equal distance: 40 downscales by 8, 28 upscales by 4 (doubled to 8).
        let set = set_with(vec![
            pic(40, 40, &[0; 1600]),
            pic(28, 28, &[1; 784]),
        ]);
        assert_eq!(best_original_for(&set, 32, 32), 0);
    }

    #[test]
    fn blend_follows_the_source_over_formula() {
        let opaque_red = 0xff00_0064u32; // r=100, a=255
        assert_eq!(blend(0, opaque_red, 255), opaque_red);
        assert_eq!(blend(0, opaque_red, 0), 0);
        // Half strength: r = 0 + (100 - 0) * 127 / 255 = 49
        let half = blend(0, opaque_red, 127);
        assert_eq!(half & 0xff, 49);
        // Transparent source leaves the background alone.
        assert_eq!(blend(0x1234_5678, 0x0000_00ff, 255), 0x1234_5678);
    }

    #[test]
    fn composite_centers_and_clips() {
        let src = pic(2, 2, &[0xff00_00ff; 4]);
        let mut dst = vec![0u32; 16];
        composite(&mut dst, 4, 4, Rect::new(0, 0, 4, 4), &src, 255);
        // Centered at (1,1)..(3,3).
        for y in 0..4 {
            for x in 0..4 {
                let inside = (1..3).contains(&x) && (1..3).contains(&y);
                let expect = if inside { 0xff00_00ff } else { 0 };
                assert_eq!(dst[y * 4 + x], expect, "pixel ({x},{y})");
            }
        }

        // A source larger than the buffer clips instead of panicking.
        let big = pic(8, 8, &[0xff00_00ff; 64]);
        let mut small = vec![0u32; 4];
        composite(&mut small, 2, 2, Rect::new(0, 0, 2, 2), &big, 255);
        assert!(small.iter().all(|&px| px == 0xff00_00ff));
    }
}
