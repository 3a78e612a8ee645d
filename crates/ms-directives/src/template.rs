//! Command template expansion.

use ms_core::{PostProcess, RESULT_DIR};
use tracing::debug;

const RESULT: &str = "[RESULT]";
const RESULT_DEMIME: &str = "[RESULT_DEMIME]";
const RESULT_DEVERSION: &str = "[RESULT_DEVERSION]";
const MAPFILE: &str = "[MAPFILE]";
const SHP2IMG: &str = "[SHP2IMG]";
const MAPSERV: &str = "[MAPSERV]";
const LEGEND: &str = "[LEGEND]";
const SCALEBAR: &str = "[SCALEBAR]";

/// Executables substituted for the program tokens of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Programs {
    pub shp2img: String,
    pub mapserv: String,
    pub legend: String,
    pub scalebar: String,
}

impl Default for Programs {
    fn default() -> Self {
        Self {
            shp2img: "shp2img".to_string(),
            mapserv: "mapserv".to_string(),
            legend: "legend".to_string(),
            scalebar: "scalebar".to_string(),
        }
    }
}

/// Substitute every token of `template`.
///
/// The result tokens all expand to `result/<output>`; which one was used
/// decides the post-processing applied to the artifact afterwards.
#[must_use]
pub fn expand_command(
    template: &str,
    output: &str,
    mapfile: &str,
    programs: &Programs,
) -> (String, PostProcess) {
    let post = PostProcess {
        demime: template.contains(RESULT_DEMIME),
        deversion: template.contains(RESULT_DEVERSION),
    };

    let result_path = format!("{RESULT_DIR}/{output}");
    let command = template
        .replace(RESULT, &result_path)
        .replace(RESULT_DEMIME, &result_path)
        .replace(RESULT_DEVERSION, &result_path)
        .replace(MAPFILE, mapfile)
        .replace(SHP2IMG, &programs.shp2img)
        .replace(MAPSERV, &programs.mapserv)
        .replace(LEGEND, &programs.legend)
        .replace(SCALEBAR, &programs.scalebar);

    debug!("expanded `{template}` -> `{command}`");
    (command, post)
}

/// Run `command` under memcheck, sending its report next to the artifact.
#[must_use]
pub fn wrap_valgrind(command: &str, output: &str) -> String {
    format!(
        "valgrind --tool=memcheck --leak-check=full {} 2>{RESULT_DIR}/{output}.vgrind.txt",
        command.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::{Programs, expand_command, wrap_valgrind};
    use ms_core::{DEFAULT_COMMAND, PostProcess};

    #[test]
    fn expands_default_command() {
        let programs = Programs {
            shp2img: "/opt/ms/bin/shp2img".to_string(),
            ..Programs::default()
        };
        let (command, post) = expand_command(DEFAULT_COMMAND, "line.png", "line.map", &programs);
        assert_eq!(command, "/opt/ms/bin/shp2img -m line.map -o result/line.png");
        assert_eq!(post, PostProcess::default());
    }

    #[test]
    fn demime_token_requests_header_stripping() {
        let template = "[MAPSERV] QUERY_STRING='map=[MAPFILE]&mode=map' > [RESULT_DEMIME]";
        let (command, post) = expand_command(template, "wms.png", "wms.map", &Programs::default());
        assert_eq!(
            command,
            "mapserv QUERY_STRING='map=wms.map&mode=map' > result/wms.png"
        );
        assert!(post.demime);
        assert!(!post.deversion);
    }

    #[test]
    fn deversion_token_requests_banner_stripping() {
        let template = "[MAPSERV] QUERY_STRING='map=[MAPFILE]&SERVICE=WMS' > [RESULT_DEVERSION]";
        let (command, post) = expand_command(template, "caps.xml", "caps.map", &Programs::default());
        assert!(command.ends_with("> result/caps.xml"));
        assert!(post.deversion);
        assert!(!post.demime);
    }

    #[test]
    fn expands_legend_and_scalebar_programs() {
        let programs = Programs {
            legend: "./legend".to_string(),
            scalebar: "./scalebar".to_string(),
            ..Programs::default()
        };
        let (legend, _) = expand_command("[LEGEND] [MAPFILE] [RESULT]", "l.png", "a.map", &programs);
        let (scalebar, _) =
            expand_command("[SCALEBAR] [MAPFILE] [RESULT]", "s.png", "a.map", &programs);
        assert_eq!(legend, "./legend a.map result/l.png");
        assert_eq!(scalebar, "./scalebar a.map result/s.png");
    }

    #[test]
    fn valgrind_wrapping() {
        let wrapped = wrap_valgrind("  shp2img -m a.map -o result/a.png \n", "a.png");
        assert_eq!(
            wrapped,
            "valgrind --tool=memcheck --leak-check=full shp2img -m a.map -o result/a.png 2>result/a.png.vgrind.txt"
        );
    }
}
