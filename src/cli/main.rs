use vbsign::bios::{BiosComponent, BiosImage};
use vbsign::fmap::{Fmap, ImageKind, recognize};
use vbsign::kernel::{KERNEL_MAGIC, KernelImage, KernelSignOptions, resign_kernel, sign_kernel, verify_kernel};
use vbsign::profile::{KeyPaths, LoemProfile, SigningProfile};
use vbsign::rwsig::{RWSIG_DEFAULT_SIZE, RwSigImage, RwSigOptions, sign_rwsig};
use vbsign::{
    BootMode, ChainSource, IndexedPayload, IntegrityPolicy, KeyPair, Keyblock, KeyblockFlags,
    PackedPublicKey, PrivateKey, PublicKey, SignOptions, SlotId, SlotSigner, SlotVerdict,
    Signature, TrustChain, VbError, VerifyOptions, sign_bios,
};

use vbsign::reexports::log;

use clap::{Arg, ArgAction, ArgMatches, Command, crate_description, crate_name, crate_version};
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

/// Helper function to create a file with parent directories
fn create_file_with_dirs(path: impl AsRef<Path>) -> Result<File, VbError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            VbError::InternalError(format!(
                "Failed to create parent directory for '{}': {}",
                path.display(),
                e
            ))
        })?;
    }
    File::create(path).map_err(|e| {
        VbError::InternalError(format!("Failed to create file '{}': {}", path.display(), e))
    })
}

fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>, VbError> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| {
        VbError::InternalError(format!("Failed to open file '{}': {}", path.display(), e))
    })
}

fn write_file(path: impl AsRef<Path>, bytes: &[u8]) -> Result<(), VbError> {
    let mut fp = create_file_with_dirs(path)?;
    fp.write_all(bytes)?;
    Ok(())
}

/// Accepts decimal and `0x` prefixed hexadecimal numbers.
fn parse_number<T: TryFrom<u64>>(s: &str) -> Result<T, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    }
    .map_err(|e| format!("invalid number '{s}': {e}"))?;
    T::try_from(value).map_err(|_| format!("'{s}' is out of range"))
}

fn input_arg() -> Arg {
    Arg::new("in")
        .value_name("input_file")
        .long("input-file")
        .short('i')
        .required(true)
        .help("Input file")
}

fn output_arg() -> Arg {
    Arg::new("out")
        .value_name("output_file")
        .long("output-file")
        .short('o')
        .required(true)
        .help("Output file")
}

/// Key and chain options shared by the signing commands.
fn signing_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("profile")
            .long("profile")
            .value_name("profile_file")
            .help("TOML signing profile; command line options take precedence"),
    )
    .arg(
        Arg::new("signprivate")
            .long("signprivate")
            .short('k')
            .value_name("private_key_file")
            .help("Data private key signing the body and the preamble"),
    )
    .arg(
        Arg::new("keyblock")
            .long("keyblock")
            .short('b')
            .value_name("keyblock_file")
            .conflicts_with("root_private")
            .help("Existing keyblock to reuse"),
    )
    .arg(
        Arg::new("root_private")
            .long("root-private")
            .value_name("private_key_file")
            .help("Private key signing a fresh keyblock"),
    )
    .arg(
        Arg::new("data_public")
            .long("data-public")
            .value_name("public_key_file")
            .help("Data public key for a fresh keyblock, derived from --signprivate if unset"),
    )
    .arg(
        Arg::new("keyblock_flags")
            .long("keyblock-flags")
            .value_name("flags")
            .value_parser(parse_number::<u32>)
            .help("Boot mode flags of a fresh keyblock"),
    )
    .arg(
        Arg::new("flags")
            .long("flags")
            .short('f')
            .value_name("flags")
            .value_parser(parse_number::<u32>)
            .help("Preamble flags"),
    )
}

/// Options shared by the verification commands.
fn verify_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("min_version")
            .long("min-version")
            .value_name("version")
            .value_parser(parse_number::<u32>)
            .help("Reject chains whose combined key and body version is lower"),
    )
    .arg(
        Arg::new("developer")
            .long("developer")
            .action(ArgAction::SetTrue)
            .help("Check keyblock flags for developer mode"),
    )
    .arg(
        Arg::new("recovery")
            .long("recovery")
            .action(ArgAction::SetTrue)
            .help("Check keyblock flags for recovery mode"),
    )
    .arg(
        Arg::new("minios")
            .long("minios")
            .action(ArgAction::SetTrue)
            .help("Check keyblock flags for MiniOS"),
    )
}

fn load_profile(matches: &ArgMatches) -> Result<SigningProfile, VbError> {
    let mut profile = match matches.get_one::<String>("profile") {
        Some(path) => SigningProfile::from_toml_file(path)?,
        None => SigningProfile::default(),
    };
    let keys = &mut profile.keys;
    for (arg, slot) in [
        ("signprivate", &mut keys.signprivate),
        ("keyblock", &mut keys.keyblock),
        ("root_private", &mut keys.root_private),
        ("data_public", &mut keys.data_public),
    ] {
        if let Some(path) = matches.get_one::<String>(arg) {
            *slot = Some(path.into());
        }
    }
    if matches.get_one::<String>("keyblock").is_some() {
        keys.root_private = None;
    } else if matches.get_one::<String>("root_private").is_some() {
        keys.keyblock = None;
    }
    Ok(profile)
}

/// Keys loaded for a signing command.
struct SigningKeys {
    data_key: PrivateKey,
    keyblock: Option<Vec<u8>>,
    root_key: Option<PrivateKey>,
    data_public: Option<PackedPublicKey>,
    kernel_subkey: Option<PackedPublicKey>,
}

impl SigningKeys {
    fn load(paths: &KeyPaths) -> Result<Self, VbError> {
        let data_key = paths
            .signprivate
            .as_ref()
            .ok_or(VbError::UsageError("Missing data private key (--signprivate)"))?;
        let load_public =
            |path: &Path| -> Result<PackedPublicKey, VbError> { Ok(PublicKey::from_any_file(path)?.to_packed()) };
        Ok(SigningKeys {
            data_key: PrivateKey::from_any_file(data_key)?,
            keyblock: paths.keyblock.as_ref().map(read_file).transpose()?,
            root_key: paths
                .root_private
                .as_ref()
                .map(PrivateKey::from_any_file)
                .transpose()?,
            data_public: paths.data_public.as_deref().map(load_public).transpose()?,
            kernel_subkey: paths.kernel_subkey.as_deref().map(load_public).transpose()?,
        })
    }

    fn source(&self, flags: KeyblockFlags) -> Result<ChainSource<'_>, VbError> {
        if let Some(keyblock) = &self.keyblock {
            return Ok(ChainSource::Reuse(keyblock));
        }
        let root_key = self.root_key.as_ref().ok_or(VbError::UsageError(
            "Either --keyblock or --root-private is required",
        ))?;
        let data_key = match &self.data_public {
            Some(key) => key.clone(),
            None => self.data_key.public_key(1).to_packed(),
        };
        Ok(ChainSource::Fresh {
            root_key,
            data_key,
            flags,
        })
    }
}

fn verify_options(matches: &ArgMatches, root_key: Option<PackedPublicKey>) -> VerifyOptions {
    let mut options = VerifyOptions::default();
    if let Some(key) = root_key {
        options = options.with_root_key(key);
    }
    if let Some(&version) = matches.get_one::<u32>("min_version") {
        options = options.with_min_version(version);
    }
    let mode = BootMode {
        developer: matches.get_flag("developer"),
        recovery: matches.get_flag("recovery"),
        minios: matches.get_flag("minios"),
    };
    if mode != BootMode::default() {
        options = options.with_boot_mode(mode);
    }
    options
}

fn key_summary(key: &PackedPublicKey) -> String {
    match PublicKey::from_packed(key) {
        Ok(pk) => format!("ed25519 v{} [{}]", pk.key_version, pk.key_digest()),
        Err(_) => format!("algorithm {} v{} (unsupported)", key.algorithm, key.key_version),
    }
}

fn show_keyblock(keyblock: &Keyblock, verbose: bool) {
    println!("  Keyblock:        {:#x} bytes", keyblock.keyblock_size);
    println!("    Flags:         {:?}", keyblock.flags);
    println!("    Data key:      {}", key_summary(&keyblock.data_key));
    if verbose {
        println!("    Signature:     {} bytes", keyblock.signature.sig_data.len());
    }
}

fn show_chain(chain: &TrustChain, verbose: bool) {
    show_keyblock(&chain.keyblock, verbose);
    let preamble = &chain.preamble;
    println!("  Preamble:        {:#x} bytes", preamble.preamble_size);
    println!("    Version:       {}", preamble.version);
    println!("    Flags:         {:#x}", preamble.flags);
    println!(
        "    Body:          {:#x} bytes ({:?} signature)",
        preamble.body_len(),
        preamble.body_signature.kind
    );
    if let Some(subkey) = &preamble.subkey {
        println!("    Kernel subkey: {}", key_summary(subkey));
    }
}

fn show_fmap(fmap: &Fmap) {
    println!(
        "FMAP \"{}\" at {:#x}, base {:#x}, size {:#x}",
        fmap.name(),
        fmap.position,
        fmap.base,
        fmap.size
    );
    for area in &fmap.areas {
        println!(
            "  {:<24} {:#010x} {:#010x}",
            area.name(),
            area.offset,
            area.size
        );
    }
}

fn show_bios(bytes: &[u8], verbose: bool) -> Result<(), VbError> {
    if verbose {
        if let Some(fmap) = Fmap::find(bytes) {
            show_fmap(&fmap);
            println!();
        }
    }
    let image = BiosImage::parse(bytes)?;
    match image.gbb() {
        Ok(gbb) => {
            println!("GBB:");
            println!("  HWID:            {}", gbb.hwid);
            println!("  Flags:           {:#x}", gbb.flags);
            if let Some(key) = &gbb.root_key {
                println!("  Root key:        {}", key_summary(key));
            }
            if let Some(key) = &gbb.recovery_key {
                println!("  Recovery key:    {}", key_summary(key));
            }
        }
        Err(e) => println!("GBB: {e}"),
    }
    for id in SlotId::ALL {
        let component = BiosComponent::vblock(id);
        println!("{component}:");
        match image.area_bytes(component) {
            Some(area) => match TrustChain::parse(area) {
                Ok(chain) => show_chain(&chain, verbose),
                Err(e) => println!("  {e}"),
            },
            None => println!("  not present"),
        }
    }
    Ok(())
}

fn show_kernel(bytes: &[u8], verbose: bool) -> Result<(), VbError> {
    let kernel = KernelImage::parse(bytes)?;
    println!("Kernel:");
    println!("  Header:          {:#x} bytes", kernel.header_size);
    println!("  Body:            {:#x} bytes", kernel.body_size);
    show_chain(&kernel.trust_chain()?, verbose);
    Ok(())
}

fn show_signature(sig: &Signature) {
    println!("  Algorithm:       {}", sig.algorithm());
    println!("  Data size:       {:#x}", sig.data_size);
    println!("  Signature:       {} bytes", sig.sig_data.len());
}

fn show_rwsig(bytes: &[u8], verbose: bool) -> Result<(), VbError> {
    if verbose {
        if let Some(fmap) = Fmap::find(bytes) {
            show_fmap(&fmap);
            println!();
        }
    }
    let image = RwSigImage::parse(bytes, RWSIG_DEFAULT_SIZE)?;
    let layout = image.layout();
    println!("RW data:           {:#x} bytes at {:#x}", layout.data.len, layout.data.offset);
    match image.stored_key() {
        Some(Ok(key)) => println!("RO key:            {}", key_summary(&key)),
        Some(Err(e)) => println!("RO key:            {e}"),
        None => {}
    }
    println!("RW signature:");
    match image.signature() {
        Ok(sig) => show_signature(&sig),
        Err(e) => println!("  {e}"),
    }
    if layout.key.is_some() {
        println!("RW image: {}", image.verify(None));
    }
    Ok(())
}

fn show(bytes: &[u8], verbose: bool) -> Result<(), VbError> {
    match recognize(bytes) {
        ImageKind::Bios => show_bios(bytes, verbose),
        ImageKind::Kernel => show_kernel(bytes, verbose),
        ImageKind::RwSig => show_rwsig(bytes, verbose),
        ImageKind::Unknown => {
            if let Ok(chain) = TrustChain::parse(bytes) {
                show_chain(&chain, verbose);
            } else if let Ok(keyblock) = Keyblock::parse(bytes) {
                show_keyblock(&keyblock, verbose);
            } else if let Ok(key) = PublicKey::from_bytes(bytes) {
                println!("Public key: {}", key_summary(&key.to_packed()));
            } else if let Ok(sig) = Signature::parse(bytes) {
                println!("Signature:");
                show_signature(&sig);
            } else {
                return Err(VbError::UnsupportedImage);
            }
            Ok(())
        }
    }
}

fn print_verdict(name: &str, verdict: &SlotVerdict) {
    if verdict.is_missing() {
        println!("{name}: not present");
    } else {
        println!("{name}: {verdict}");
    }
}

fn write_loem_vblocks(loem: &LoemProfile, vblocks: &[(SlotId, Vec<u8>)]) -> Result<(), VbError> {
    for (id, vblock) in vblocks {
        let path = loem.path(*id);
        write_file(&path, vblock)?;
        println!("{} trust chain saved to [{}]", id, path.display());
    }
    Ok(())
}

fn start() -> Result<(), VbError> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Verbose output"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("Prints debugging information"),
        )
        .subcommand(
            Command::new("keygen")
                .about("Generate a new key pair")
                .arg(
                    Arg::new("secret_key")
                        .value_name("secret_key_file")
                        .long("secret-key")
                        .short('k')
                        .required(true)
                        .help("Secret key file"),
                )
                .arg(
                    Arg::new("public_key")
                        .value_name("public_key_file")
                        .long("public-key")
                        .short('K')
                        .required(true)
                        .help("Public key file"),
                )
                .arg(
                    Arg::new("key_version")
                        .long("key-version")
                        .value_name("version")
                        .value_parser(parse_number::<u16>)
                        .default_value("1")
                        .help("Version stored with the public key (16 bits)"),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Print the trust chains of an image, keyblock or key")
                .arg(input_arg()),
        )
        .subcommand(verify_args(
            Command::new("verify")
                .about("Verify both slots of a firmware image")
                .arg(input_arg())
                .arg(
                    Arg::new("root_key")
                        .long("root-key")
                        .value_name("public_key_file")
                        .help("Root public key to use instead of the GBB one"),
                ),
        ))
        .subcommand(signing_args(
            Command::new("sign")
                .about("Sign the slots of a firmware image")
                .arg(input_arg())
                .arg(output_arg())
                .arg(
                    Arg::new("version")
                        .long("fw-version")
                        .value_name("version")
                        .value_parser(parse_number::<u16>)
                        .help("Firmware version, taken from the existing chain if unset"),
                )
                .arg(
                    Arg::new("kernel_subkey")
                        .long("kernel-subkey")
                        .value_name("public_key_file")
                        .help("Kernel subkey to put in the preambles"),
                )
                .arg(
                    Arg::new("fv_size_a")
                        .long("fv-size-a")
                        .value_name("size")
                        .value_parser(parse_number::<usize>)
                        .help("Signed length of FW_MAIN_A"),
                )
                .arg(
                    Arg::new("fv_size_b")
                        .long("fv-size-b")
                        .value_name("size")
                        .value_parser(parse_number::<usize>)
                        .help("Signed length of FW_MAIN_B"),
                )
                .arg(
                    Arg::new("integrity")
                        .long("integrity")
                        .value_name("policy")
                        .value_parser(["auto", "required", "disabled"])
                        .help("Sign the body metadata digest instead of the body"),
                )
                .arg(
                    Arg::new("loemdir")
                        .long("loemdir")
                        .value_name("dir")
                        .requires("loemid")
                        .help("Write the trust chains to this directory"),
                )
                .arg(
                    Arg::new("loemid")
                        .long("loemid")
                        .value_name("id")
                        .help("Suffix of the trust chain files written with --loemdir"),
                ),
        ))
        .subcommand(signing_args(
            Command::new("sign-kernel")
                .about("Sign a kernel body, or re-sign a kernel image")
                .arg(input_arg())
                .arg(output_arg())
                .arg(
                    Arg::new("version")
                        .long("kernel-version")
                        .value_name("version")
                        .value_parser(parse_number::<u16>)
                        .help("Kernel version"),
                )
                .arg(
                    Arg::new("padding")
                        .long("padding")
                        .value_name("size")
                        .value_parser(parse_number::<usize>)
                        .help("Size of the kernel header"),
                )
                .arg(
                    Arg::new("vblock_only")
                        .long("vblock-only")
                        .action(ArgAction::SetTrue)
                        .help("Only write the keyblock and preamble"),
                ),
        ))
        .subcommand(
            Command::new("sign-rwsig")
                .about("Sign the RW part of an image checked by its RO key")
                .arg(input_arg())
                .arg(output_arg())
                .arg(
                    Arg::new("signprivate")
                        .long("signprivate")
                        .short('k')
                        .value_name("private_key_file")
                        .required(true)
                        .help("Private key signing the RW data"),
                )
                .arg(
                    Arg::new("data_size")
                        .long("data-size")
                        .value_name("size")
                        .value_parser(parse_number::<usize>)
                        .help("Number of RW bytes to sign (default: as previously signed)"),
                )
                .arg(
                    Arg::new("sig_size")
                        .long("sig-size")
                        .value_name("size")
                        .value_parser(parse_number::<usize>)
                        .default_value("1024")
                        .help("Signature space at the end of an RW blob without FMAP"),
                )
                .arg(
                    Arg::new("key_version")
                        .long("key-version")
                        .value_name("version")
                        .value_parser(parse_number::<u32>)
                        .default_value("1")
                        .help("Version stored with the public key in KEY_RO"),
                ),
        )
        .subcommand(
            Command::new("verify-rwsig")
                .about("Verify the RW signature of an image")
                .arg(input_arg())
                .arg(
                    Arg::new("signpubkey")
                        .long("signpubkey")
                        .short('K')
                        .value_name("public_key_file")
                        .help("Public key checking the RW data (default: KEY_RO)"),
                )
                .arg(
                    Arg::new("sig_size")
                        .long("sig-size")
                        .value_name("size")
                        .value_parser(parse_number::<usize>)
                        .default_value("1024")
                        .help("Signature space at the end of an RW blob without FMAP"),
                ),
        )
        .subcommand(verify_args(
            Command::new("verify-kernel")
                .about("Verify a kernel image")
                .arg(input_arg())
                .arg(
                    Arg::new("signpubkey")
                        .long("signpubkey")
                        .short('K')
                        .value_name("public_key_file")
                        .required(true)
                        .help("Public key that signed the kernel keyblock"),
                ),
        ))
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let debug = matches.get_flag("debug");

    env_logger::builder()
        .format_timestamp(None)
        .format_level(false)
        .format_module_path(false)
        .format_target(false)
        .filter_level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if let Some(matches) = matches.subcommand_matches("show") {
        let input_file = matches
            .get_one::<String>("in")
            .ok_or(VbError::UsageError("Missing input file"))?;
        show(&read_file(input_file)?, verbose)?;
    } else if let Some(matches) = matches.subcommand_matches("keygen") {
        let key_version = matches.get_one::<u16>("key_version").copied().unwrap_or(1);
        let kp = KeyPair::generate(u32::from(key_version));
        let sk_file = matches
            .get_one::<String>("secret_key")
            .ok_or(VbError::UsageError("Missing secret key file"))?;
        let pk_file = matches
            .get_one::<String>("public_key")
            .ok_or(VbError::UsageError("Missing public key file"))?;
        kp.sk.to_file(sk_file)?;
        println!("Secret key saved to [{sk_file}]");
        kp.pk.to_file(pk_file)?;
        println!("Public key saved to [{pk_file}]");
    } else if let Some(matches) = matches.subcommand_matches("verify") {
        let input_file = matches
            .get_one::<String>("in")
            .ok_or(VbError::UsageError("Missing input file"))?;
        let root_key = matches
            .get_one::<String>("root_key")
            .map(|path| PublicKey::from_any_file(path).map(|pk| pk.to_packed()))
            .transpose()?;
        let bytes = read_file(input_file)?;
        let image = BiosImage::parse(bytes.as_slice())?;
        let report = image.verify_with(verify_options(matches, root_key), &IndexedPayload);
        if let Some(gbb) = &report.gbb {
            println!("HWID: {}", gbb.hwid);
        }
        for id in SlotId::ALL {
            print_verdict(BiosComponent::vblock(id).name(), report.slot(id));
        }
        if !report.is_success() {
            return Err(VbError::VerificationFailed);
        }
        println!("Firmware image is valid.");
    } else if let Some(matches) = matches.subcommand_matches("sign") {
        let input_file = matches
            .get_one::<String>("in")
            .ok_or(VbError::UsageError("Missing input file"))?;
        let output_file = matches
            .get_one::<String>("out")
            .ok_or(VbError::UsageError("Missing output file"))?;

        let mut profile = load_profile(matches)?;
        if let Some(path) = matches.get_one::<String>("kernel_subkey") {
            profile.keys.kernel_subkey = Some(path.into());
        }
        let firmware = &mut profile.firmware;
        if let Some(&version) = matches.get_one::<u16>("version") {
            firmware.version = Some(version);
        }
        if let Some(&flags) = matches.get_one::<u32>("flags") {
            firmware.flags = Some(flags);
        }
        if let Some(&flags) = matches.get_one::<u32>("keyblock_flags") {
            firmware.keyblock_flags = Some(flags);
        }
        if let Some(&len) = matches.get_one::<usize>("fv_size_a") {
            firmware.fv_size_a = Some(len);
        }
        if let Some(&len) = matches.get_one::<usize>("fv_size_b") {
            firmware.fv_size_b = Some(len);
        }
        if let Some(policy) = matches.get_one::<String>("integrity") {
            firmware.integrity = match policy.as_str() {
                "required" => IntegrityPolicy::Required,
                "disabled" => IntegrityPolicy::Disabled,
                _ => IntegrityPolicy::Auto,
            };
        }
        if let (Some(dir), Some(id)) = (
            matches.get_one::<String>("loemdir"),
            matches.get_one::<String>("loemid"),
        ) {
            profile.loem = Some(LoemProfile {
                dir: dir.into(),
                id: id.clone(),
            });
        }

        let keys = SigningKeys::load(&profile.keys)?;
        let mut options = profile.firmware.sign_options();
        if let Some(subkey) = &keys.kernel_subkey {
            options = options.with_kernel_subkey(subkey.clone());
        }
        let payload = IndexedPayload;
        let signer = SlotSigner::new(
            keys.source(profile.firmware.keyblock_flags())?,
            &keys.data_key,
            options,
        )?
        .with_payload_format(&payload);

        let mut image = read_file(input_file)?;
        let report = sign_bios(&mut image, &signer)?;
        for slot in &report.slots {
            println!(
                "{}: version {}, flags {:#x}, {:#x} body bytes{}",
                slot.id,
                slot.version,
                slot.flags,
                slot.body_len,
                if slot.digest_signed {
                    " (metadata digest)"
                } else {
                    ""
                }
            );
        }
        write_file(output_file, &image)?;
        println!("Signed image saved to [{output_file}]");
        if let Some(loem) = &profile.loem {
            write_loem_vblocks(loem, &report.vblocks)?;
        }
    } else if let Some(matches) = matches.subcommand_matches("sign-kernel") {
        let input_file = matches
            .get_one::<String>("in")
            .ok_or(VbError::UsageError("Missing input file"))?;
        let output_file = matches
            .get_one::<String>("out")
            .ok_or(VbError::UsageError("Missing output file"))?;

        let mut profile = load_profile(matches)?;
        let kernel = &mut profile.kernel;
        if let Some(&version) = matches.get_one::<u16>("version") {
            kernel.version = Some(version);
        }
        if let Some(&flags) = matches.get_one::<u32>("flags") {
            kernel.flags = Some(flags);
        }
        if let Some(&flags) = matches.get_one::<u32>("keyblock_flags") {
            kernel.keyblock_flags = Some(flags);
        }
        if let Some(&padding) = matches.get_one::<usize>("padding") {
            kernel.padding = Some(padding);
        }

        let keys = SigningKeys::load(&profile.keys)?;
        let options: SignOptions = profile.kernel.sign_options();
        let signer = SlotSigner::new(
            keys.source(profile.kernel.keyblock_flags())?,
            &keys.data_key,
            options,
        )?;

        let input = read_file(input_file)?;
        let image = if input.starts_with(KERNEL_MAGIC) {
            log::info!("Re-signing existing kernel image");
            resign_kernel(&input, &signer)?
        } else {
            let padding = profile.kernel.padding.unwrap_or_default();
            sign_kernel(&input, &signer, KernelSignOptions { padding })?
        };
        if matches.get_flag("vblock_only") {
            write_file(output_file, &KernelImage::parse(&image)?.vblock()?)?;
            println!("Kernel trust chain saved to [{output_file}]");
        } else {
            write_file(output_file, &image)?;
            println!("Signed kernel saved to [{output_file}]");
        }
    } else if let Some(matches) = matches.subcommand_matches("verify-kernel") {
        let input_file = matches
            .get_one::<String>("in")
            .ok_or(VbError::UsageError("Missing input file"))?;
        let key_file = matches
            .get_one::<String>("signpubkey")
            .ok_or(VbError::UsageError("Missing public key file"))?;
        let key = PublicKey::from_any_file(key_file)?.to_packed();
        let bytes = read_file(input_file)?;
        let verdict = verify_kernel(&bytes, &key, verify_options(matches, None))?;
        print_verdict("kernel", &verdict);
        if !verdict.is_trusted() {
            return Err(VbError::VerificationFailed);
        }
        println!("Kernel image is valid.");
    } else if let Some(matches) = matches.subcommand_matches("sign-rwsig") {
        let input_file = matches
            .get_one::<String>("in")
            .ok_or(VbError::UsageError("Missing input file"))?;
        let output_file = matches
            .get_one::<String>("out")
            .ok_or(VbError::UsageError("Missing output file"))?;
        let key_file = matches
            .get_one::<String>("signprivate")
            .ok_or(VbError::UsageError("Missing private key file"))?;
        let key = PrivateKey::from_any_file(key_file)?;
        let sig_size = matches
            .get_one::<usize>("sig_size")
            .copied()
            .unwrap_or(RWSIG_DEFAULT_SIZE);
        let options = RwSigOptions {
            data_size: matches.get_one::<usize>("data_size").copied(),
            key_version: matches.get_one::<u32>("key_version").copied().unwrap_or(1),
        };
        let mut image = read_file(input_file)?;
        let report = sign_rwsig(&mut image, &key, sig_size, options)?;
        write_file(output_file, &image)?;
        println!(
            "Signed {:#x} RW bytes{}, saved to [{output_file}]",
            report.data_size,
            if report.key_written { " and stored the RO key" } else { "" }
        );
    } else if let Some(matches) = matches.subcommand_matches("verify-rwsig") {
        let input_file = matches
            .get_one::<String>("in")
            .ok_or(VbError::UsageError("Missing input file"))?;
        let key = matches
            .get_one::<String>("signpubkey")
            .map(|file| PublicKey::from_any_file(file).map(|pk| pk.to_packed()))
            .transpose()?;
        let sig_size = matches
            .get_one::<usize>("sig_size")
            .copied()
            .unwrap_or(RWSIG_DEFAULT_SIZE);
        let bytes = read_file(input_file)?;
        let verdict = RwSigImage::parse(bytes.as_slice(), sig_size)?.verify(key.as_ref());
        println!("RW image: {verdict}");
        if !verdict.is_trusted() {
            return Err(VbError::VerificationFailed);
        }
        println!("Signature verification succeeded.");
    } else {
        return Err(VbError::UsageError("No subcommand specified"));
    }
    Ok(())
}

fn main() -> Result<(), VbError> {
    let res = start();
    match res {
        Ok(_) => {}
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
    Ok(())
}
