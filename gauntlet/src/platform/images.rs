//! Image-reference translation between runtime alias syntaxes.

use super::detect::Runtime;

/// Rewrite an image reference for the target runtime. LXD references pass
/// through unchanged. For Incus, `<remote>:<alias>` becomes
/// `images:<remote>/<alias>` unless the remote is already `images`.
pub fn translate_image(reference: &str, runtime: Runtime) -> String {
    if runtime == Runtime::Lxd {
        return reference.to_string();
    }

    let Some((remote, alias)) = reference.split_once(':') else {
        return reference.to_string();
    };

    if remote == "images" {
        return reference.to_string();
    }

    format!("images:{remote}/{alias}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lxd_references_pass_through() {
        assert_eq!(translate_image("ubuntu:24.04", Runtime::Lxd), "ubuntu:24.04");
    }

    #[test]
    fn incus_rewrites_foreign_remotes() {
        assert_eq!(
            translate_image("ubuntu:24.04", Runtime::Incus),
            "images:ubuntu/24.04"
        );
    }

    #[test]
    fn incus_keeps_the_images_remote() {
        assert_eq!(
            translate_image("images:alpine/3.20", Runtime::Incus),
            "images:alpine/3.20"
        );
    }

    #[test]
    fn unqualified_references_pass_through() {
        assert_eq!(translate_image("noble", Runtime::Incus), "noble");
    }
}
