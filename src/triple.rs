//! Parsed target triples.
//!
//! Triple *parsing* belongs to the surrounding driver; this module only
//! defines the parsed form and the OS/environment predicates the classifiers
//! key their carve-outs on.

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Arch {
    X86,
    X86_64,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum Vendor {
    #[default]
    Unknown,
    Pc,
    Apple,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum Os {
    #[default]
    Unknown,
    Linux,
    Darwin,
    Windows,
    FreeBsd,
    OpenBsd,
    NetBsd,
    DragonFly,
    Solaris,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum Environment {
    #[default]
    Unknown,
    Gnu,
    Musl,
    Msvc,
    Cygnus,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Triple {
    pub arch: Arch,
    pub vendor: Vendor,
    pub os: Os,
    pub environment: Environment,
}

impl Triple {
    pub fn new(arch: Arch, vendor: Vendor, os: Os, environment: Environment) -> Triple {
        Triple { arch, vendor, os, environment }
    }

    pub fn is_os_darwin(&self) -> bool {
        self.os == Os::Darwin
    }

    pub fn is_os_windows(&self) -> bool {
        self.os == Os::Windows
    }

    /// Cygwin or MinGW: a Windows OS with a GNU-flavored environment.
    pub fn is_cyg_ming(&self) -> bool {
        self.os == Os::Windows
            && matches!(self.environment, Environment::Cygnus | Environment::Gnu)
    }

    /// The MSVC-compatible Windows environment (where `inalloca` and the
    /// Win32 struct rules apply).
    pub fn is_win32_msvc(&self) -> bool {
        self.is_os_windows() && !self.is_cyg_ming()
    }
}
