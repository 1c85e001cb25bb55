use crate::format::ProgramLayout;

pub(crate) const VERTEX: &str = "#version 100
attribute vec2 position;
attribute vec2 texpos;
uniform vec4 region;
varying vec2 opos;
void main(void)
{
    opos = region.xy + texpos * region.zw;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

const HEADER: &str = "precision mediump float;
varying vec2 opos;
uniform vec2 tex_scale0;
uniform vec2 tex_scale1;
uniform vec2 tex_scale2;
";

// BT.601 limited range
const YUV_TO_RGB: &str = "const vec3 offset = vec3(-0.0625, -0.5, -0.5);
const vec3 rcoeff = vec3(1.164, 0.000, 1.596);
const vec3 gcoeff = vec3(1.164, -0.391, -0.813);
const vec3 bcoeff = vec3(1.164, 2.018, 0.000);
vec4 to_rgb(vec3 yuv)
{
    yuv += offset;
    return vec4(dot(yuv, rcoeff), dot(yuv, gcoeff), dot(yuv, bcoeff), 1.0);
}
";

pub(crate) fn fragment(layout: ProgramLayout) -> String {
    let body = match layout {
        ProgramLayout::Copy => "uniform sampler2D tex;
void main(void)
{
    vec4 t = texture2D(tex, opos / tex_scale0);
    gl_FragColor = vec4(t.rgb, 1.0);
}
"
        .to_string(),
        ProgramLayout::Reorder(swizzle) => format!(
            "uniform sampler2D tex;
void main(void)
{{
    vec4 t = texture2D(tex, opos / tex_scale0);
    gl_FragColor = vec4(t.{}, 1.0);
}}
",
            swizzle.as_str()
        ),
        ProgramLayout::Ayuv => format!(
            "uniform sampler2D tex;
{YUV_TO_RGB}void main(void)
{{
    gl_FragColor = to_rgb(texture2D(tex, opos / tex_scale0).gba);
}}
"
        ),
        ProgramLayout::PlanarYuv => format!(
            "uniform sampler2D Ytex, Utex, Vtex;
{YUV_TO_RGB}void main(void)
{{
    vec3 yuv;
    yuv.x = texture2D(Ytex, opos / tex_scale0).r;
    yuv.y = texture2D(Utex, opos / tex_scale1).r;
    yuv.z = texture2D(Vtex, opos / tex_scale2).r;
    gl_FragColor = to_rgb(yuv);
}}
"
        ),
        ProgramLayout::SemiPlanar { swap_uv } => format!(
            "uniform sampler2D Ytex, UVtex;
{YUV_TO_RGB}void main(void)
{{
    vec3 yuv;
    yuv.x = texture2D(Ytex, opos / tex_scale0).r;
    yuv.yz = texture2D(UVtex, opos / tex_scale1).{};
    gl_FragColor = to_rgb(yuv);
}}
",
            if swap_uv { "ar" } else { "ra" }
        ),
        ProgramLayout::External => {
            return format!(
                "#version 100
#extension GL_OES_EGL_image_external : require
{HEADER}uniform samplerExternalOES tex;
void main(void)
{{
    gl_FragColor = texture2D(tex, opos / tex_scale0);
}}
"
            );
        }
    };

    format!("#version 100\n{HEADER}{body}")
}
