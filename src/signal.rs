//! Effect signal algebra for composing screen-space shading passes.
//!
//! An [`EffectSignal`] is a handle to a not-yet-evaluated per-pixel computation:
//! a node in an immutable expression tree whose leaves are G-buffer samples and
//! pass outputs, and whose interior nodes are algebraic combinators. Combining
//! two signals always produces a new node; operands are never mutated. Nodes
//! are shared by `Arc`, so intermediate signals are freed once nothing reaches
//! them from the graph root.
//!
//! Signals carry a declared [`SignalShape`] and combinators are shape-checked
//! at construction time. A signal tree is turned into GPU work by
//! [`compile_composite`], which emits a deterministic WGSL fragment shader,
//! and can be evaluated on the CPU with [`EffectSignal::eval`] — the reference
//! semantics the WGSL emission must agree with.

use std::fmt::Write as _;
use std::sync::Arc;

use glam::{Vec3, Vec4};

/// Output shape of a signal: one channel, three, or three plus alpha.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SignalShape {
    /// A single per-pixel value (e.g. ambient occlusion).
    Scalar,
    /// An RGB color.
    Color,
    /// An RGBA color with alpha.
    ColorAlpha,
}

/// Semantic role of a scene-capture buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Rendered scene color (HDR).
    Color,
    /// Encoded view-space normals.
    Normal,
    /// Hardware depth.
    Depth,
    /// Per-pixel screen-space motion.
    Velocity,
    /// Metalness in R, roughness in G.
    MetalRough,
}

/// A materialized pass output a signal can sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PassSource {
    /// SSGI output: GI radiance in rgb, AO in alpha.
    Ssgi,
    /// SSR output: reflection color in rgb, hit confidence in alpha.
    Ssr,
    /// Bloom output: glow in rgb.
    Bloom,
    /// The first composite (color combined with GI/AO).
    Composite1,
    /// TAA resolve output: the graph root.
    Taa,
}

/// Channel selection applied to a texture leaf.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Channels {
    /// All four channels.
    All,
    /// RGB only.
    Rgb,
    /// Red channel.
    R,
    /// Green channel.
    G,
    /// Alpha channel.
    A,
}

impl Channels {
    fn shape(self) -> SignalShape {
        match self {
            Channels::All => SignalShape::ColorAlpha,
            Channels::Rgb => SignalShape::Color,
            Channels::R | Channels::G | Channels::A => SignalShape::Scalar,
        }
    }

    fn swizzle(self) -> &'static str {
        match self {
            Channels::All => "",
            Channels::Rgb => ".rgb",
            Channels::R => ".r",
            Channels::G => ".g",
            Channels::A => ".a",
        }
    }
}

/// A texture a compiled signal shader needs bound, in binding order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SignalInput {
    /// A scene-capture buffer.
    Buffer(BufferRole),
    /// A materialized pass output.
    Pass(PassSource),
}

#[derive(Debug, PartialEq)]
enum SignalExpr {
    Sample(SignalInput, Channels),
    Constant(f32),
    Add(EffectSignal, EffectSignal),
    Mul(EffectSignal, EffectSignal),
    Blend(EffectSignal, EffectSignal),
    WithAlpha(EffectSignal, EffectSignal),
}

#[derive(Debug, PartialEq)]
struct SignalNode {
    expr: SignalExpr,
    shape: SignalShape,
}

/// Error produced when signals are combined with incompatible shapes.
#[derive(Debug, PartialEq)]
pub enum SignalError {
    /// The two operand shapes cannot be combined by the named operator.
    ShapeMismatch {
        /// The combinator that was attempted.
        op: &'static str,
        /// Shape of the left operand.
        lhs: SignalShape,
        /// Shape of the right operand.
        rhs: SignalShape,
    },
}

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalError::ShapeMismatch { op, lhs, rhs } => {
                write!(f, "cannot {} signals of shape {:?} and {:?}", op, lhs, rhs)
            }
        }
    }
}

impl std::error::Error for SignalError {}

/// A CPU-side signal value, used by the reference evaluator.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SignalValue {
    /// A scalar sample.
    Scalar(f32),
    /// An RGB sample.
    Color(Vec3),
    /// An RGBA sample.
    ColorAlpha(Vec4),
}

impl SignalValue {
    fn rgb(self) -> Vec3 {
        match self {
            SignalValue::Scalar(s) => Vec3::splat(s),
            SignalValue::Color(c) => c,
            SignalValue::ColorAlpha(c) => c.truncate(),
        }
    }

    fn scalar(self) -> f32 {
        match self {
            SignalValue::Scalar(s) => s,
            SignalValue::Color(c) => c.x,
            SignalValue::ColorAlpha(c) => c.x,
        }
    }
}

/// An immutable handle to a per-pixel computation.
///
/// Cloning is cheap (an `Arc` bump) and shares the underlying node, so a
/// signal can feed several downstream combinators. Equality is structural:
/// two independently built trees with the same topology compare equal, which
/// is what graph-rebuild idempotence is checked against.
#[derive(Clone, Debug)]
pub struct EffectSignal {
    node: Arc<SignalNode>,
}

impl PartialEq for EffectSignal {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl EffectSignal {
    fn wrap(expr: SignalExpr, shape: SignalShape) -> Self {
        Self {
            node: Arc::new(SignalNode { expr, shape }),
        }
    }

    /// A leaf sampling a scene-capture buffer.
    pub fn buffer(role: BufferRole, channels: Channels) -> Self {
        Self::wrap(
            SignalExpr::Sample(SignalInput::Buffer(role), channels),
            channels.shape(),
        )
    }

    /// A leaf sampling a materialized pass output.
    pub fn pass(source: PassSource, channels: Channels) -> Self {
        Self::wrap(
            SignalExpr::Sample(SignalInput::Pass(source), channels),
            channels.shape(),
        )
    }

    /// A constant scalar signal.
    pub fn constant(value: f32) -> Self {
        Self::wrap(SignalExpr::Constant(value), SignalShape::Scalar)
    }

    /// The declared output shape of this signal.
    pub fn shape(&self) -> SignalShape {
        self.node.shape
    }

    /// Component-wise addition. Both operands must share a shape.
    pub fn add(&self, other: &EffectSignal) -> Result<EffectSignal, SignalError> {
        if self.shape() != other.shape() {
            return Err(SignalError::ShapeMismatch {
                op: "add",
                lhs: self.shape(),
                rhs: other.shape(),
            });
        }
        let shape = self.shape();
        Ok(Self::wrap(
            SignalExpr::Add(self.clone(), other.clone()),
            shape,
        ))
    }

    /// Component-wise multiplication. Operands must share a shape, or one
    /// must be scalar (broadcast over the other).
    pub fn mul(&self, other: &EffectSignal) -> Result<EffectSignal, SignalError> {
        let shape = match (self.shape(), other.shape()) {
            (a, b) if a == b => a,
            (SignalShape::Scalar, b) => b,
            (a, SignalShape::Scalar) => a,
            (lhs, rhs) => {
                return Err(SignalError::ShapeMismatch {
                    op: "multiply",
                    lhs,
                    rhs,
                });
            }
        };
        Ok(Self::wrap(
            SignalExpr::Mul(self.clone(), other.clone()),
            shape,
        ))
    }

    /// Alpha blend: `overlay` laid over `self` weighted by the overlay's
    /// alpha, base alpha passed through. Both operands must be `ColorAlpha`.
    pub fn blend(&self, overlay: &EffectSignal) -> Result<EffectSignal, SignalError> {
        if self.shape() != SignalShape::ColorAlpha || overlay.shape() != SignalShape::ColorAlpha {
            return Err(SignalError::ShapeMismatch {
                op: "blend",
                lhs: self.shape(),
                rhs: overlay.shape(),
            });
        }
        Ok(Self::wrap(
            SignalExpr::Blend(self.clone(), overlay.clone()),
            SignalShape::ColorAlpha,
        ))
    }

    /// Pairs an RGB signal with a scalar alpha into a `ColorAlpha` signal.
    pub fn with_alpha(&self, alpha: &EffectSignal) -> Result<EffectSignal, SignalError> {
        if self.shape() != SignalShape::Color || alpha.shape() != SignalShape::Scalar {
            return Err(SignalError::ShapeMismatch {
                op: "pair alpha onto",
                lhs: self.shape(),
                rhs: alpha.shape(),
            });
        }
        Ok(Self::wrap(
            SignalExpr::WithAlpha(self.clone(), alpha.clone()),
            SignalShape::ColorAlpha,
        ))
    }

    /// Evaluates the signal on the CPU for a single pixel.
    ///
    /// `resolve` supplies the sampled value for every leaf. This mirrors the
    /// WGSL the compiler emits and exists so the composition rules can be
    /// checked without a GPU device.
    pub fn eval<F>(&self, resolve: &F) -> SignalValue
    where
        F: Fn(SignalInput) -> Vec4,
    {
        match &self.node.expr {
            SignalExpr::Sample(input, channels) => {
                let v = resolve(*input);
                match channels {
                    Channels::All => SignalValue::ColorAlpha(v),
                    Channels::Rgb => SignalValue::Color(v.truncate()),
                    Channels::R => SignalValue::Scalar(v.x),
                    Channels::G => SignalValue::Scalar(v.y),
                    Channels::A => SignalValue::Scalar(v.w),
                }
            }
            SignalExpr::Constant(c) => SignalValue::Scalar(*c),
            SignalExpr::Add(a, b) => {
                let (a, b) = (a.eval(resolve), b.eval(resolve));
                match (a, b) {
                    (SignalValue::Scalar(x), SignalValue::Scalar(y)) => SignalValue::Scalar(x + y),
                    (SignalValue::ColorAlpha(x), SignalValue::ColorAlpha(y)) => {
                        SignalValue::ColorAlpha(x + y)
                    }
                    _ => SignalValue::Color(a.rgb() + b.rgb()),
                }
            }
            SignalExpr::Mul(a, b) => {
                let (av, bv) = (a.eval(resolve), b.eval(resolve));
                match self.node.shape {
                    SignalShape::Scalar => SignalValue::Scalar(av.scalar() * bv.scalar()),
                    SignalShape::Color => {
                        let a_rgb = match av {
                            SignalValue::Scalar(s) => Vec3::splat(s),
                            other => other.rgb(),
                        };
                        let b_rgb = match bv {
                            SignalValue::Scalar(s) => Vec3::splat(s),
                            other => other.rgb(),
                        };
                        SignalValue::Color(a_rgb * b_rgb)
                    }
                    SignalShape::ColorAlpha => match (av, bv) {
                        (SignalValue::ColorAlpha(x), SignalValue::ColorAlpha(y)) => {
                            SignalValue::ColorAlpha(x * y)
                        }
                        (SignalValue::Scalar(s), SignalValue::ColorAlpha(y)) => {
                            SignalValue::ColorAlpha(y * s)
                        }
                        (SignalValue::ColorAlpha(x), SignalValue::Scalar(s)) => {
                            SignalValue::ColorAlpha(x * s)
                        }
                        _ => unreachable!("shape checked at construction"),
                    },
                }
            }
            SignalExpr::Blend(base, overlay) => {
                let (b, o) = (base.eval(resolve), overlay.eval(resolve));
                let (b, o) = match (b, o) {
                    (SignalValue::ColorAlpha(b), SignalValue::ColorAlpha(o)) => (b, o),
                    _ => unreachable!("shape checked at construction"),
                };
                let rgb = b.truncate().lerp(o.truncate(), o.w);
                SignalValue::ColorAlpha(rgb.extend(b.w))
            }
            SignalExpr::WithAlpha(rgb, alpha) => {
                let rgb = rgb.eval(resolve).rgb();
                let alpha = alpha.eval(resolve).scalar();
                SignalValue::ColorAlpha(rgb.extend(alpha))
            }
        }
    }

    /// Collects the distinct texture leaves in first-use order.
    pub fn inputs(&self) -> Vec<SignalInput> {
        let mut out = Vec::new();
        self.collect_inputs(&mut out);
        out
    }

    fn collect_inputs(&self, out: &mut Vec<SignalInput>) {
        match &self.node.expr {
            SignalExpr::Sample(input, _) => {
                if !out.contains(input) {
                    out.push(*input);
                }
            }
            SignalExpr::Constant(_) => {}
            SignalExpr::Add(a, b)
            | SignalExpr::Mul(a, b)
            | SignalExpr::Blend(a, b)
            | SignalExpr::WithAlpha(a, b) => {
                a.collect_inputs(out);
                b.collect_inputs(out);
            }
        }
    }

    fn emit(&self, bindings: &[SignalInput], out: &mut String) {
        match &self.node.expr {
            SignalExpr::Sample(input, channels) => {
                let index = bindings
                    .iter()
                    .position(|b| b == input)
                    .expect("leaf collected before emission");
                let _ = write!(
                    out,
                    "textureSample(input_{}, input_sampler, in.uv){}",
                    index,
                    channels.swizzle()
                );
            }
            SignalExpr::Constant(c) => {
                let _ = write!(out, "{:?}", c);
            }
            SignalExpr::Add(a, b) => {
                out.push('(');
                a.emit(bindings, out);
                out.push_str(" + ");
                b.emit(bindings, out);
                out.push(')');
            }
            SignalExpr::Mul(a, b) => {
                out.push('(');
                a.emit(bindings, out);
                out.push_str(" * ");
                b.emit(bindings, out);
                out.push(')');
            }
            SignalExpr::Blend(base, overlay) => {
                let mut base_s = String::new();
                base.emit(bindings, &mut base_s);
                let mut over_s = String::new();
                overlay.emit(bindings, &mut over_s);
                let _ = write!(
                    out,
                    "blend_over({}, {})",
                    base_s, over_s
                );
            }
            SignalExpr::WithAlpha(rgb, alpha) => {
                let mut rgb_s = String::new();
                rgb.emit(bindings, &mut rgb_s);
                let mut a_s = String::new();
                alpha.emit(bindings, &mut a_s);
                let _ = write!(out, "vec4f({}, {})", rgb_s, a_s);
            }
        }
    }
}

/// A signal tree compiled to a fullscreen WGSL shader.
#[derive(Debug, PartialEq)]
pub struct CompiledComposite {
    /// Complete shader module source with `vs`/`fs` entry points.
    pub wgsl: String,
    /// Textures to bind at group 0, bindings 1.., in order. Binding 0 is the
    /// shared sampler.
    pub inputs: Vec<SignalInput>,
}

/// Compiles a `ColorAlpha` signal into a fullscreen-triangle WGSL shader.
///
/// Emission is deterministic: the same tree always produces byte-identical
/// source, so pipeline caching can key on the rebuild tuple alone.
pub fn compile_composite(root: &EffectSignal) -> CompiledComposite {
    debug_assert_eq!(root.shape(), SignalShape::ColorAlpha);

    let inputs = root.inputs();

    let mut wgsl = String::from(
        "struct VsOut {\n    @builtin(position) position: vec4f,\n    @location(0) uv: vec2f,\n}\n\n@group(0) @binding(0) var input_sampler: sampler;\n",
    );
    for (i, _) in inputs.iter().enumerate() {
        let _ = writeln!(
            wgsl,
            "@group(0) @binding({}) var input_{}: texture_2d<f32>;",
            i + 1,
            i
        );
    }

    wgsl.push_str(
        "\n@vertex\nfn vs(@builtin(vertex_index) vi: u32) -> VsOut {\n    var out: VsOut;\n    let uv = vec2f(f32((vi << 1u) & 2u), f32(vi & 2u));\n    out.position = vec4f(uv * 2.0 - 1.0, 0.0, 1.0);\n    out.uv = vec2f(uv.x, 1.0 - uv.y);\n    return out;\n}\n\nfn blend_over(base: vec4f, overlay: vec4f) -> vec4f {\n    return vec4f(mix(base.rgb, overlay.rgb, overlay.a), base.a);\n}\n\n@fragment\nfn fs(in: VsOut) -> @location(0) vec4f {\n    return ",
    );
    root.emit(&inputs, &mut wgsl);
    wgsl.push_str(";\n}\n");

    CompiledComposite { wgsl, inputs }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color() -> EffectSignal {
        EffectSignal::buffer(BufferRole::Color, Channels::Rgb)
    }

    #[test]
    fn shapes_of_leaves() {
        assert_eq!(color().shape(), SignalShape::Color);
        assert_eq!(
            EffectSignal::pass(PassSource::Ssgi, Channels::A).shape(),
            SignalShape::Scalar
        );
        assert_eq!(
            EffectSignal::buffer(BufferRole::Color, Channels::All).shape(),
            SignalShape::ColorAlpha
        );
    }

    #[test]
    fn add_requires_matching_shapes() {
        let ao = EffectSignal::pass(PassSource::Ssgi, Channels::A);
        let err = color().add(&ao).unwrap_err();
        assert_eq!(
            err,
            SignalError::ShapeMismatch {
                op: "add",
                lhs: SignalShape::Color,
                rhs: SignalShape::Scalar,
            }
        );
    }

    #[test]
    fn mul_broadcasts_scalar() {
        let ao = EffectSignal::pass(PassSource::Ssgi, Channels::A);
        let shaded = color().mul(&ao).unwrap();
        assert_eq!(shaded.shape(), SignalShape::Color);
    }

    #[test]
    fn blend_requires_color_alpha() {
        let base = color();
        let ssr = EffectSignal::pass(PassSource::Ssr, Channels::All);
        assert!(base.blend(&ssr).is_err());

        let base = base.with_alpha(&EffectSignal::constant(1.0)).unwrap();
        assert!(base.blend(&ssr).is_ok());
    }

    #[test]
    fn structural_equality_across_independent_builds() {
        let build = || {
            let ao = EffectSignal::pass(PassSource::Ssgi, Channels::A);
            let gi = EffectSignal::pass(PassSource::Ssgi, Channels::Rgb);
            let lit = color().mul(&ao).unwrap().add(&color().mul(&gi).unwrap());
            lit.unwrap()
                .with_alpha(&EffectSignal::buffer(BufferRole::Color, Channels::A))
                .unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn eval_zero_gi_and_ao_keeps_raw_color() {
        // composited1 = color.rgb * AO + color.rgb * GI, alpha passthrough.
        let ao = EffectSignal::constant(0.0);
        let gi = EffectSignal::constant(0.0);

        let composited = color()
            .mul(&ao)
            .unwrap()
            .add(&color().mul(&gi).unwrap())
            .unwrap()
            .with_alpha(&EffectSignal::buffer(BufferRole::Color, Channels::A))
            .unwrap();

        let scene = Vec4::new(0.3, 0.6, 0.9, 1.0);
        let resolve = |input: SignalInput| match input {
            SignalInput::Buffer(BufferRole::Color) => scene,
            _ => Vec4::ZERO,
        };

        // AO = 0 and GI = 0 black out the color path entirely.
        assert_eq!(
            composited.eval(&resolve),
            SignalValue::ColorAlpha(Vec4::new(0.0, 0.0, 0.0, 1.0))
        );

        // With AO = 1 and GI = 0 the raw scene color passes through exactly.
        let composited = color()
            .mul(&EffectSignal::constant(1.0))
            .unwrap()
            .add(&color().mul(&EffectSignal::constant(0.0)).unwrap())
            .unwrap()
            .with_alpha(&EffectSignal::buffer(BufferRole::Color, Channels::A))
            .unwrap();
        assert_eq!(composited.eval(&resolve), SignalValue::ColorAlpha(scene));
    }

    #[test]
    fn eval_zero_bloom_is_additive_identity() {
        let composited = EffectSignal::pass(PassSource::Composite1, Channels::Rgb);
        let bloom = EffectSignal::pass(PassSource::Bloom, Channels::Rgb);
        let with_bloom = composited.add(&bloom).unwrap();

        let base = Vec4::new(0.2, 0.4, 0.8, 1.0);
        let resolve = |input: SignalInput| match input {
            SignalInput::Pass(PassSource::Composite1) => base,
            SignalInput::Pass(PassSource::Bloom) => Vec4::ZERO,
            _ => Vec4::ZERO,
        };
        assert_eq!(
            with_bloom.eval(&resolve),
            SignalValue::Color(base.truncate())
        );
    }

    #[test]
    fn eval_blend_uses_overlay_alpha_and_keeps_base_alpha() {
        let base = EffectSignal::pass(PassSource::Composite1, Channels::All);
        let ssr = EffectSignal::pass(PassSource::Ssr, Channels::All);
        let blended = base.blend(&ssr).unwrap();

        let resolve = |input: SignalInput| match input {
            SignalInput::Pass(PassSource::Composite1) => Vec4::new(1.0, 0.0, 0.0, 0.75),
            SignalInput::Pass(PassSource::Ssr) => Vec4::new(0.0, 1.0, 0.0, 0.5),
            _ => Vec4::ZERO,
        };
        assert_eq!(
            blended.eval(&resolve),
            SignalValue::ColorAlpha(Vec4::new(0.5, 0.5, 0.0, 0.75))
        );

        // Zero-alpha overlay (an SSR miss) leaves the base untouched.
        let resolve_miss = |input: SignalInput| match input {
            SignalInput::Pass(PassSource::Composite1) => Vec4::new(1.0, 0.0, 0.0, 0.75),
            _ => Vec4::ZERO,
        };
        assert_eq!(
            blended.eval(&resolve_miss),
            SignalValue::ColorAlpha(Vec4::new(1.0, 0.0, 0.0, 0.75))
        );
    }

    #[test]
    fn inputs_deduplicate_in_first_use_order() {
        let c = EffectSignal::buffer(BufferRole::Color, Channels::Rgb);
        let ao = EffectSignal::pass(PassSource::Ssgi, Channels::A);
        let gi = EffectSignal::pass(PassSource::Ssgi, Channels::Rgb);
        let tree = c
            .mul(&ao)
            .unwrap()
            .add(&c.mul(&gi).unwrap())
            .unwrap();
        assert_eq!(
            tree.inputs(),
            vec![
                SignalInput::Buffer(BufferRole::Color),
                SignalInput::Pass(PassSource::Ssgi),
            ]
        );
    }

    #[test]
    fn compile_is_deterministic() {
        let build = || {
            let base = EffectSignal::pass(PassSource::Composite1, Channels::All);
            let ssr = EffectSignal::pass(PassSource::Ssr, Channels::All);
            compile_composite(&base.blend(&ssr).unwrap())
        };
        let (a, b) = (build(), build());
        assert_eq!(a.wgsl, b.wgsl);
        assert_eq!(a.inputs, b.inputs);
    }

    #[test]
    fn compile_emits_bindings_and_blend_helper() {
        let base = EffectSignal::pass(PassSource::Composite1, Channels::All);
        let ssr = EffectSignal::pass(PassSource::Ssr, Channels::All);
        let compiled = compile_composite(&base.blend(&ssr).unwrap());

        assert_eq!(compiled.inputs.len(), 2);
        assert!(compiled.wgsl.contains("@group(0) @binding(1) var input_0"));
        assert!(compiled.wgsl.contains("@group(0) @binding(2) var input_1"));
        assert!(compiled.wgsl.contains("blend_over("));
        assert!(compiled.wgsl.contains("@fragment"));
    }
}
