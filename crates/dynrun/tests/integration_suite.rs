use std::cell::Cell;

use dynpack::Byte32;

use dynrun::CodeResolver;
use dynrun::ErrorKind;
use dynrun::HashType;
use dynrun::Loader;
use dynrun::LoaderConfig;
use dynrun::LoaderError;
use dynrun::LocalHost;
use dynrun::Payload;
use dynrun::Stage;
use dynrun::Syscalls;
use dynrun::args;
use dynrun::arena::MAX_LABEL_LEN;
use dynrun::arena::MAX_PAYLOAD_LEN;
use dynrun::image::pad_to_page;
use dynrun::syscalls::CellField;
use dynrun::syscalls::SysError;

// --- Helpers ---

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Compiles a WAT fixture from `tests/fixtures` to a page-aligned image.
fn fixture(name: &str) -> Vec<u8> {
    let path = format!("tests/fixtures/{}.wat", name);
    let module = wat::parse_file(&path).unwrap_or_else(|e| panic!("Could not build {}: {}", path, e));
    pad_to_page(&module)
}

fn image(wat: &str) -> Vec<u8> {
    pad_to_page(&wat::parse_str(wat).expect("invalid wat"))
}

fn loader() -> Loader {
    init_tracing();
    Loader::new(LoaderConfig::default()).expect("default config is valid")
}

/// Deploys `code` and points the current script at it with `payload`.
fn host_running(code: Vec<u8>, payload: &[u8]) -> LocalHost {
    let mut host = LocalHost::new();
    let out_point = host.deploy_cell(code);
    let script = host
        .build_script(&out_point, HashType::Data1, payload)
        .expect("script encodes")
        .expect("cell is addressable");
    host.set_script(script);
    host
}

/// Counts how often the host is asked about code dependencies.
struct CountingHost {
    inner: LocalHost,
    cell_calls: Cell<usize>,
}

impl CountingHost {
    fn new(inner: LocalHost) -> Self {
        Self { inner, cell_calls: Cell::new(0) }
    }
}

impl Syscalls for CountingHost {
    fn load_script(&self, buf: &mut [u8], offset: usize) -> Result<usize, SysError> {
        self.inner.load_script(buf, offset)
    }

    fn load_cell_data(&self, buf: &mut [u8], offset: usize, index: usize) -> Result<usize, SysError> {
        self.cell_calls.set(self.cell_calls.get() + 1);
        self.inner.load_cell_data(buf, offset, index)
    }

    fn load_cell_hash(&self, index: usize, field: CellField) -> Result<Option<Byte32>, SysError> {
        self.cell_calls.set(self.cell_calls.get() + 1);
        self.inner.load_cell_hash(index, field)
    }
}

/// Reports honest hashes but serves corrupted data.
struct TamperedHost(LocalHost);

impl Syscalls for TamperedHost {
    fn load_script(&self, buf: &mut [u8], offset: usize) -> Result<usize, SysError> {
        self.0.load_script(buf, offset)
    }

    fn load_cell_data(&self, buf: &mut [u8], offset: usize, index: usize) -> Result<usize, SysError> {
        let len = self.0.load_cell_data(buf, offset, index)?;
        if let Some(last) = buf.last_mut() {
            *last ^= 0xFF;
        }
        Ok(len)
    }

    fn load_cell_hash(&self, index: usize, field: CellField) -> Result<Option<Byte32>, SysError> {
        self.0.load_cell_hash(index, field)
    }
}

const NULL_CONSTRUCT: &str = r#"
(module
  (import "env" "memory" (memory 1))
  (func (export "construct") (param i32 i32) (result i32) (i32.const 0))
  (func (export "evaluate") (param i32 i32 i32 i32) (result i32) (i32.const 0))
  (func (export "teardown") (param i32)))
"#;

const TRAPPING_EVALUATE: &str = r#"
(module
  (func (export "construct") (param i32 i32) (result i32) (local.get 0))
  (func (export "evaluate") (param i32 i32 i32 i32) (result i32) (unreachable))
  (func (export "teardown") (param i32)))
"#;

const SPINNING_EVALUATE: &str = r#"
(module
  (func (export "construct") (param i32 i32) (result i32) (local.get 0))
  (func (export "evaluate") (param i32 i32 i32 i32) (result i32)
    (loop $forever (br $forever))
    (i32.const 0))
  (func (export "teardown") (param i32)))
"#;

const MISSING_TEARDOWN: &str = r#"
(module
  (func (export "construct") (param i32 i32) (result i32) (local.get 0))
  (func (export "evaluate") (param i32 i32 i32 i32) (result i32) (i32.const 0)))
"#;

const WRONG_EVALUATE_SIGNATURE: &str = r#"
(module
  (func (export "construct") (param i32 i32) (result i32) (local.get 0))
  (func (export "evaluate") (param i32 i32 i32) (result i32) (i32.const 0))
  (func (export "teardown") (param i32)))
"#;

const FOREIGN_IMPORT: &str = r#"
(module
  (import "env" "exec" (func (param i32)))
  (func (export "construct") (param i32 i32) (result i32) (local.get 0))
  (func (export "evaluate") (param i32 i32 i32 i32) (result i32) (i32.const 0))
  (func (export "teardown") (param i32)))
"#;

// --- End-to-end scenarios ---

#[test]
fn test_ping_reaches_torn_down() {
    let loader = loader();
    let host = host_running(fixture("echo"), b"ping");

    let report = loader.invoke(&host, "test");

    assert!(report.error.is_none(), "unexpected error: {:?}", report.error);
    assert_eq!(report.reached, Stage::TornDown);
    assert_eq!(report.outcome, Some(0));
    assert_eq!(report.exit_code(), 0);
    assert!(report.is_success());
    assert_eq!(report.messages, vec!["test", "ping", "teardown"]);
    assert!(report.cycles > 0);
    assert!(report.cycles <= loader.config().max_cycles);
}

#[test]
fn test_nonzero_evaluate_skips_teardown() {
    let loader = loader();
    let host = host_running(fixture("echo"), b"pong");

    let report = loader.invoke(&host, "test");

    assert_eq!(report.reached, Stage::ContextConstructed);
    assert_eq!(report.failed_at(), Some(Stage::ContextConstructed));
    assert_eq!(report.outcome, Some(104));
    assert_eq!(report.exit_code(), 104);
    assert!(matches!(report.error, Some(LoaderError::EvaluateFailed(104))));
    assert_eq!(report.messages, vec!["test", "pong"]);
}

#[test]
fn test_literal_payload_overrides_args() {
    let loader = loader();
    let host = host_running(fixture("echo"), b"ignored");

    let report = loader.invoke_with(&host, Payload::Literal(b"ping"), "literal");

    assert!(report.is_success());
    assert_eq!(report.messages, vec!["literal", "ping", "teardown"]);
}

#[test]
fn test_empty_payload() {
    let loader = loader();
    let host = host_running(fixture("echo"), b"");

    let report = loader.invoke(&host, "test");

    assert_eq!(report.outcome, Some(100));
    assert_eq!(report.failed_at(), Some(Stage::ContextConstructed));
}

#[test]
fn test_flipped_hash_bit_fails_to_load() {
    let loader = loader();
    let mut host = LocalHost::new();
    let code = fixture("echo");
    let out_point = host.deploy_cell(code);
    let mut hash = host.code_hash(&out_point, HashType::Data).unwrap();
    hash[0] ^= 0x01;
    host.set_script(host.build_script_with_code_hash(hash, HashType::Data, b"ping").unwrap());

    let report = loader.invoke(&host, "test");

    assert!(matches!(report.error, Some(LoaderError::CodeNotFound(h)) if h == hash));
    assert_eq!(report.error.as_ref().unwrap().kind(), ErrorKind::LoadFailure);
    assert_eq!(report.exit_code(), 40);
    assert_eq!(report.reached, Stage::Init);
    assert_eq!(report.outcome, None);
    assert!(report.messages.is_empty(), "no entry point may run");
}

#[test]
fn test_truncated_args_never_reach_resolver() {
    let loader = loader();
    let mut inner = LocalHost::new();
    inner.deploy_cell(fixture("echo"));
    inner.set_script(inner.build_script_with_args(vec![0u8; 30]).unwrap());
    let host = CountingHost::new(inner);

    let report = loader.invoke(&host, "test");

    assert!(matches!(
        report.error,
        Some(LoaderError::InvalidArgsFormat { len: 30, min: 35 })
    ));
    assert_eq!(report.exit_code(), 43);
    assert_eq!(report.reached, Stage::Init);
    assert_eq!(host.cell_calls.get(), 0);
}

#[test]
fn test_oversized_script_rejected_before_parsing() {
    let loader = Loader::new(LoaderConfig::default().with_max_script_size(64)).unwrap();
    let mut inner = LocalHost::new();
    inner.set_script(vec![0xAB; 65]);
    let host = CountingHost::new(inner);

    let report = loader.invoke(&host, "test");

    assert!(matches!(
        report.error,
        Some(LoaderError::ScriptTooLarge { len: 65, limit: 64 })
    ));
    assert_eq!(report.error.as_ref().unwrap().kind(), ErrorKind::SizeLimit);
    assert_eq!(report.exit_code(), -21);
    assert_eq!(host.cell_calls.get(), 0);
}

#[test]
fn test_malformed_envelope() {
    let loader = loader();
    let mut host = LocalHost::new();
    host.set_script(vec![0x40, 1, 0, 0, 0]);

    let report = loader.invoke(&host, "test");

    assert!(matches!(report.error, Some(LoaderError::Encoding(_))));
    assert_eq!(report.exit_code(), -2);
}

#[test]
fn test_unknown_hash_type() {
    let loader = loader();
    let mut host = LocalHost::new();
    let mut args = vec![0u8; args::MIN_ARGS_SIZE];
    args[args::MIN_ARGS_SIZE - 1] = 7;
    host.set_script(host.build_script_with_args(args).unwrap());

    let report = loader.invoke(&host, "test");

    assert!(matches!(report.error, Some(LoaderError::UnknownHashType(7))));
    assert_eq!(report.exit_code(), 43);
}

// --- Code resolution ---

#[test]
fn test_type_hash_resolution() {
    let loader = loader();
    let mut host = LocalHost::new();
    let type_script = dynpack::ScriptBuilder::new()
        .code_hash([9u8; 32])
        .hash_type(HashType::Type.into())
        .args(b"type-id".to_vec())
        .build()
        .unwrap();
    let out_point = host.deploy_cell_with_type(fixture("echo"), type_script);
    let script = host.build_script(&out_point, HashType::Type, b"ping").unwrap().unwrap();
    host.set_script(script);

    let report = loader.invoke(&host, "typed");

    assert!(report.is_success(), "unexpected error: {:?}", report.error);
}

#[test]
fn test_type_hash_needs_type_script() {
    let mut host = LocalHost::new();
    let out_point = host.deploy_cell(fixture("echo"));
    assert_eq!(host.build_script(&out_point, HashType::Type, b"").unwrap(), None);

    let data_hash = host.code_hash(&out_point, HashType::Data).unwrap();
    host.set_script(host.build_script_with_code_hash(data_hash, HashType::Type, b"").unwrap());

    let report = loader().invoke(&host, "test");
    assert!(matches!(report.error, Some(LoaderError::CodeNotFound(_))));
}

#[test]
fn test_second_dependency_is_found() {
    let loader = loader();
    let mut host = LocalHost::new();
    host.deploy_cell(image(NULL_CONSTRUCT));
    let out_point = host.deploy_cell(fixture("echo"));
    host.set_script(host.build_script(&out_point, HashType::Data, b"ping").unwrap().unwrap());

    assert!(loader.invoke(&host, "test").is_success());
}

#[test]
fn test_tampered_data_fails_authentication() {
    let loader = loader();
    let host = TamperedHost(host_running(fixture("echo"), b"ping"));

    let report = loader.invoke(&host, "test");

    assert!(matches!(report.error, Some(LoaderError::HashMismatch(_))));
    assert_eq!(report.exit_code(), 40);
}

#[test]
fn test_unaligned_image_is_malformed() {
    let loader = loader();
    let raw = wat::parse_file("tests/fixtures/echo.wat").unwrap();
    assert_ne!(raw.len() % 4096, 0);
    let host = host_running(raw, b"ping");

    let report = loader.invoke(&host, "test");

    assert!(matches!(report.error, Some(LoaderError::MalformedImage { .. })));
    assert_eq!(report.error.as_ref().unwrap().kind(), ErrorKind::ImageIntegrity);
    assert_eq!(report.exit_code(), 41);
    assert_eq!(report.reached, Stage::Init);
}

#[test]
fn test_code_larger_than_arena() {
    let loader = Loader::new(LoaderConfig::default().with_max_code_size(4096)).unwrap();
    let two_pages = pad_to_page(&fixture("echo"));
    assert_eq!(two_pages.len(), 8192);
    let host = host_running(two_pages, b"ping");

    let report = loader.invoke(&host, "test");

    assert!(matches!(
        report.error,
        Some(LoaderError::CodeTooLarge { len: 8192, capacity: 4096 })
    ));
    assert_eq!(report.exit_code(), -21);
}

#[test]
fn test_aligned_garbage_cannot_load() {
    let loader = loader();
    let host = host_running(vec![0u8; 4096], b"ping");

    let report = loader.invoke(&host, "test");

    assert!(matches!(report.error, Some(LoaderError::CannotLoad(_))));
    assert_eq!(report.exit_code(), 40);
}

#[test]
fn test_resolution_is_repeatable() {
    let loader = loader();
    let code = fixture("echo");
    let host = host_running(code.clone(), b"ping");
    let reference = args::CodeReference {
        reserved: [0, 0],
        code_hash: dynrun::hash::digest(&code),
        hash_type: HashType::Data,
    };

    let first = CodeResolver::new(loader.engine(), &host)
        .resolve(&reference, loader.config().max_code_size)
        .unwrap();
    let second = CodeResolver::new(loader.engine(), &host)
        .resolve(&reference, loader.config().max_code_size)
        .unwrap();

    assert_eq!(first.len(), code.len());
    assert_eq!(first.len(), second.len());
    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(first.as_bytes(), &code[..]);
}

// --- Symbols and execution ---

#[test]
fn test_missing_symbol() {
    let loader = loader();
    let host = host_running(image(MISSING_TEARDOWN), b"");

    let report = loader.invoke(&host, "test");

    assert!(matches!(report.error, Some(LoaderError::SymbolNotFound("teardown"))));
    assert_eq!(report.exit_code(), 42);
    assert_eq!(report.reached, Stage::CodeLoaded);
}

#[test]
fn test_wrong_signature() {
    let loader = loader();
    let host = host_running(image(WRONG_EVALUATE_SIGNATURE), b"");

    let report = loader.invoke(&host, "test");

    assert!(matches!(report.error, Some(LoaderError::SignatureMismatch("evaluate"))));
    assert_eq!(report.exit_code(), 42);
}

#[test]
fn test_null_context() {
    let loader = loader();
    let host = host_running(image(NULL_CONSTRUCT), b"");

    let report = loader.invoke(&host, "test");

    assert!(matches!(report.error, Some(LoaderError::ConstructFailed)));
    assert_eq!(report.exit_code(), 44);
    assert_eq!(report.reached, Stage::SymbolsResolved);
    assert_eq!(report.outcome, None);
}

#[test]
fn test_trap_in_evaluate() {
    let loader = loader();
    let host = host_running(image(TRAPPING_EVALUATE), b"");

    let report = loader.invoke(&host, "test");

    assert!(matches!(report.error, Some(LoaderError::Trapped(_))));
    assert_eq!(report.exit_code(), 45);
    assert_eq!(report.reached, Stage::ContextConstructed);
    assert_eq!(report.outcome, None);
}

#[test]
fn test_evaluate_fails_at_one_state() {
    let loader = loader();
    let trapped = loader.invoke(&host_running(image(TRAPPING_EVALUATE), b""), "test");
    let rejected = loader.invoke(&host_running(fixture("echo"), b"pong"), "test");

    assert_eq!(trapped.failed_at(), Some(Stage::ContextConstructed));
    assert_eq!(trapped.failed_at(), rejected.failed_at());
}

#[test]
fn test_cycle_limit() {
    let loader = Loader::new(LoaderConfig::default().with_max_cycles(10_000)).unwrap();
    let host = host_running(image(SPINNING_EVALUATE), b"");

    let report = loader.invoke(&host, "test");

    assert!(matches!(report.error, Some(LoaderError::ExceededMaxCycles)));
    assert_eq!(report.exit_code(), 46);
    assert_eq!(report.cycles, 10_000);
}

#[test]
fn test_foreign_import_cannot_load() {
    let loader = loader();
    let host = host_running(image(FOREIGN_IMPORT), b"");

    let report = loader.invoke(&host, "test");

    assert!(matches!(report.error, Some(LoaderError::CannotLoad(_))));
    assert_eq!(report.reached, Stage::SymbolsResolved);
}

#[test]
fn test_label_with_nul_is_rejected() {
    let loader = loader();
    let host = host_running(fixture("echo"), b"ping");

    let report = loader.invoke(&host, "bad\0label");

    assert!(matches!(report.error, Some(LoaderError::ArgumentsLen { .. })));
    assert_eq!(report.exit_code(), -1);
    assert_eq!(report.reached, Stage::Init);
}

#[test]
fn test_oversized_payload_never_reaches_resolver() {
    let loader = loader();
    let host = CountingHost::new(host_running(fixture("echo"), b"ping"));
    let payload = vec![7u8; MAX_PAYLOAD_LEN + 1];

    let report = loader.invoke_with(&host, Payload::Literal(&payload), "test");

    assert!(matches!(
        report.error,
        Some(LoaderError::ArgumentsLen { payload: n, label: 4 }) if n == MAX_PAYLOAD_LEN + 1
    ));
    assert_eq!(report.error.as_ref().unwrap().kind(), ErrorKind::ArgumentFormat);
    assert_eq!(report.exit_code(), -1);
    assert_eq!(report.reached, Stage::Init);
    assert_eq!(host.cell_calls.get(), 0);
}

#[test]
fn test_largest_input_is_accepted() {
    let loader = loader();
    let host = host_running(fixture("echo"), b"ping");
    let payload = vec![7u8; MAX_PAYLOAD_LEN];
    let label = "l".repeat(MAX_LABEL_LEN);

    let report = loader.invoke_with(&host, Payload::Literal(&payload), &label);

    assert!(matches!(report.error, Some(LoaderError::EvaluateFailed(_))));
    assert_eq!(report.outcome, Some(100 + MAX_PAYLOAD_LEN as i32));
}

#[test]
fn test_debug_capture_disabled() {
    let loader = Loader::new(LoaderConfig::default().with_capture_debug(false)).unwrap();
    let host = host_running(fixture("echo"), b"ping");

    let report = loader.invoke(&host, "test");

    assert!(report.is_success());
    assert!(report.messages.is_empty());
}

#[test]
fn test_invocations_are_independent() {
    let loader = loader();
    let host = host_running(fixture("echo"), b"ping");

    let first = loader.invoke(&host, "test");
    let second = loader.invoke(&host, "test");

    assert!(first.is_success() && second.is_success());
    assert_eq!(first.cycles, second.cycles);
    assert_eq!(first.messages, second.messages);
}
