/// Package metadata extracted from a Debian pool path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub component: String,
    pub extension: String,
    pub architecture: String,
}

const POOL_PREFIX: &str = "/debian/pool/";
const COMPONENTS: [&str; 3] = ["main", "contrib", "non-free"];

/// Parse a Debian pool path into package metadata.
///
/// Recognized filename shapes:
/// - `name_version.orig.tar.{gz,xz}` (source)
/// - `name_version.dsc` (source)
/// - `name_version.tar.{gz,xz}` (source)
/// - `name_version_arch.ext` (binary)
pub fn parse(path: &str) -> Option<PackageInfo> {
    let rest = path.strip_prefix(POOL_PREFIX)?;

    let (component, _) = rest.split_once('/')?;
    if !COMPONENTS.contains(&component) {
        return None;
    }

    let filename = path.rsplit('/').next()?;

    let first_underscore = filename.find('_')?;
    let name = &filename[..first_underscore];
    if name.is_empty() {
        return None;
    }

    let last_dot = filename.rfind('.')?;
    if last_dot <= first_underscore {
        return None;
    }

    // Source tarballs with an .orig marker keep everything from the marker
    // as the extension.
    if let Some(orig_pos) = filename.find(".orig") {
        if orig_pos > first_underscore {
            return Some(PackageInfo {
                name: name.to_string(),
                version: filename[first_underscore + 1..orig_pos].to_string(),
                component: component.to_string(),
                extension: filename[orig_pos..].to_string(),
                architecture: "source".to_string(),
            });
        }
    }

    // Debian source control files.
    if &filename[last_dot..] == ".dsc" {
        return Some(PackageInfo {
            name: name.to_string(),
            version: filename[first_underscore + 1..last_dot].to_string(),
            component: component.to_string(),
            extension: ".dsc".to_string(),
            architecture: "source".to_string(),
        });
    }

    // Bare source tarballs.
    if matches!(&filename[last_dot..], ".gz" | ".xz") {
        if let Some(tar_pos) = filename[..last_dot].rfind(".tar") {
            if tar_pos > first_underscore {
                return Some(PackageInfo {
                    name: name.to_string(),
                    version: filename[first_underscore + 1..tar_pos].to_string(),
                    component: component.to_string(),
                    extension: filename[tar_pos..].to_string(),
                    architecture: "source".to_string(),
                });
            }
        }
    }

    // Binary packages: name_version_arch.ext
    let second_underscore = filename[first_underscore + 1..]
        .find('_')
        .map(|i| i + first_underscore + 1)?;
    if second_underscore >= last_dot {
        return None;
    }

    Some(PackageInfo {
        name: name.to_string(),
        version: filename[first_underscore + 1..second_underscore].to_string(),
        component: component.to_string(),
        extension: filename[last_dot..].to_string(),
        architecture: filename[second_underscore + 1..last_dot].to_string(),
    })
}
