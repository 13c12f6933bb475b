// ============================================================================
// SHADERS: WGSL source for the blit pipeline
// ============================================================================

/// One quad per blit. The vertex stage maps the unit quad onto `dst_rect`
/// (pixels of the target) and onto `src_rect` (normalized source coords).
///
/// The fragment stage reads the destination from a scratch copy
/// (`base_tex`, same pixel grid as the target) because a render target cannot
/// be sampled while it is bound. Modes: 0 normal, 1 multiply, 2 add,
/// 3 subtract, 4 erase, 5 replace.
pub const BLIT_SHADER: &str = r#"
struct BlitUniforms {
    dst_rect: vec4<f32>,
    src_rect: vec4<f32>,
    target_size: vec2<f32>,
    opacity: f32,
    mode: u32,
    tint: vec4<f32>,
};

@group(0) @binding(0) var<uniform> u: BlitUniforms;
@group(0) @binding(1) var src_tex: texture_2d<f32>;
@group(0) @binding(2) var src_samp: sampler;
@group(0) @binding(3) var base_tex: texture_2d<f32>;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_blit(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let corner = corners[vi];
    let pixel = u.dst_rect.xy + corner * u.dst_rect.zw;
    let ndc = vec2<f32>(
        pixel.x / u.target_size.x * 2.0 - 1.0,
        1.0 - pixel.y / u.target_size.y * 2.0,
    );
    var out: VertexOutput;
    out.position = vec4<f32>(ndc, 0.0, 1.0);
    out.uv = u.src_rect.xy + corner * u.src_rect.zw;
    return out;
}

fn blend(base: vec4<f32>, paste: vec4<f32>, blended: vec3<f32>) -> vec4<f32> {
    let alpha = base.a + paste.a * (1.0 - base.a);
    var cutout = 0.0;
    if (alpha > 0.0) {
        cutout = 1.0 / alpha;
    }
    let rgb = ((1.0 - paste.a) * base.a * base.rgb
        + (1.0 - base.a) * paste.a * paste.rgb
        + base.a * paste.a * blended) * cutout;
    return vec4<f32>(rgb, alpha);
}

@fragment
fn fs_blit(in: VertexOutput) -> @location(0) vec4<f32> {
    let base = textureLoad(base_tex, vec2<i32>(floor(in.position.xy)), 0);
    let inside = all(in.uv >= vec2<f32>(0.0, 0.0)) && all(in.uv <= vec2<f32>(1.0, 1.0));
    let texel = textureSample(src_tex, src_samp, in.uv) * select(0.0, 1.0, inside);

    if (u.mode == 5u) {
        return texel;
    }
    if (u.mode == 4u) {
        return vec4<f32>(base.rgb, base.a - texel.a * u.opacity);
    }

    let paste = vec4<f32>(texel.rgb * u.tint.rgb, texel.a * u.opacity);
    var blended = paste.rgb;
    if (u.mode == 1u) {
        blended = base.rgb * paste.rgb;
    } else if (u.mode == 2u) {
        blended = base.rgb + paste.rgb;
    } else if (u.mode == 3u) {
        blended = base.rgb - paste.rgb;
    }
    return blend(base, paste, blended);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blit_shader_parses_and_validates() {
        let module = naga::front::wgsl::parse_str(BLIT_SHADER).unwrap_or_else(|error| {
            panic!("WGSL parse failed for blit shader: {}", error.emit_to_string(BLIT_SHADER))
        });
        naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::empty())
            .validate(&module)
            .expect("blit shader validates");
    }
}
