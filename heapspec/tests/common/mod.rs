//! Shared test support: a mock verification engine, reachable in-process or
//! over HTTP, and the contracts the suites verify against it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use heapspec::protocol::transport::Transport;
use heapspec::protocol::{
    decode_request, ArgumentMessage, ContractMessage, LoadModuleParams, PostconditionMessage,
    RpcRequest, RpcResponse, SetupMessage, ValueMessage, VerifyParams, METHOD_CONNECT,
    METHOD_DISCONNECT, METHOD_LOAD_MODULE, METHOD_VERIFY,
};
use heapspec::{
    ContractBuilder, ContractError, ProtocolError, Return, Session, Specification, SymbolicValue,
    TypeDescriptor,
};

// ============================================
// Mock engine
// ============================================

#[derive(Debug, Clone, PartialEq)]
enum Concrete {
    Int(i128),
    Array(Vec<Concrete>),
    Ptr(Option<String>),
}

type Heap = HashMap<String, Concrete>;
type NativeFn = fn(&mut Heap, &[Concrete]) -> Option<Concrete>;

fn array_swap(heap: &mut Heap, args: &[Concrete]) -> Option<Concrete> {
    if let [Concrete::Ptr(Some(id))] = args {
        if let Some(Concrete::Array(items)) = heap.get_mut(id) {
            items.swap(0, 1);
        }
    }
    None
}

fn array_untouched(_heap: &mut Heap, _args: &[Concrete]) -> Option<Concrete> {
    None
}

fn store(heap: &mut Heap, args: &[Concrete]) -> Option<Concrete> {
    if let [Concrete::Ptr(Some(id)), value] = args {
        heap.insert(id.clone(), value.clone());
    }
    None
}

fn library(path: &str) -> Option<Vec<(&'static str, NativeFn)>> {
    match path {
        "test-files/llvm_array_swap.bc" => Some(vec![("array_swap", array_swap as NativeFn)]),
        "test-files/llvm_array_noswap.bc" => Some(vec![("array_swap", array_untouched as NativeFn)]),
        "test-files/store.bc" => Some(vec![("store", store as NativeFn)]),
        _ => None,
    }
}

const SAMPLES: [i128; 4] = [0, 1, -1, 7];

/// Engine that verifies by running native stand-ins on sampled inputs
#[derive(Default)]
pub struct MockEngine {
    modules: HashMap<String, HashMap<String, NativeFn>>,
    drop_next_verify: bool,
    drop_disconnect: bool,
}

impl MockEngine {
    /// Drops the connection instead of answering `session/disconnect`
    pub fn dropping_disconnect() -> Self {
        Self {
            drop_disconnect: true,
            ..Self::default()
        }
    }

    /// Drops the connection on the first `contract/verify`
    pub fn dropping_first_verify() -> Self {
        Self {
            drop_next_verify: true,
            ..Self::default()
        }
    }

    fn load(&mut self, params: LoadModuleParams) -> Result<Value, String> {
        let functions = library(&params.path).ok_or_else(|| format!("cannot load {}", params.path))?;
        let handle = format!("module-{}", self.modules.len());
        self.modules
            .insert(handle.clone(), functions.into_iter().map(|(n, f)| (n.to_string(), f)).collect());
        Ok(json!({ "module": handle }))
    }

    fn verify(&self, params: VerifyParams) -> Result<Value, String> {
        let request = params.request;
        let module = self
            .modules
            .get(request.module.as_str())
            .ok_or("unknown module")?;
        let function = *module.get(&request.function).ok_or("unknown function")?;
        decode_request(&request).map_err(|e| e.to_string())?;

        let contract = &request.contract;
        let vars: Vec<(String, String)> = contract
            .setup
            .iter()
            .filter_map(|stmt| match stmt {
                SetupMessage::Fresh { id, name, .. } => Some((id.clone(), name.clone())),
                SetupMessage::Allocate { .. } => None,
            })
            .collect();

        let total = SAMPLES.len().pow(vars.len() as u32);
        for n in 0..total {
            let mut assignment = HashMap::new();
            let mut k = n;
            for (id, _) in &vars {
                assignment.insert(id.clone(), SAMPLES[k % SAMPLES.len()]);
                k /= SAMPLES.len();
            }

            if let Some(reason) = run_once(function, contract, &assignment) {
                let counterexample: Vec<Value> = vars
                    .iter()
                    .map(|(id, name)| json!({ "name": name, "value": assignment[id] as i64 }))
                    .collect();
                return Ok(json!({
                    "status": "failure",
                    "diagnostic": { "message": reason, "counterexample": counterexample }
                }));
            }
        }
        Ok(json!({ "status": "success" }))
    }
}

impl MockEngine {
    /// Answer one JSON-RPC request; `None` drops the connection
    pub fn respond(&mut self, message: &str) -> Option<String> {
        let request: RpcRequest<Value> =
            serde_json::from_str(message).expect("client sent an invalid request");

        let outcome = match request.method.as_str() {
            METHOD_CONNECT => Ok(json!({ "session": "mock-session" })),
            METHOD_LOAD_MODULE => self.load(serde_json::from_value(request.params).unwrap()),
            METHOD_VERIFY => {
                if self.drop_next_verify {
                    self.drop_next_verify = false;
                    return None;
                }
                self.verify(serde_json::from_value(request.params).unwrap())
            }
            METHOD_DISCONNECT if self.drop_disconnect => return None,
            METHOD_DISCONNECT => Ok(json!({})),
            other => Err(format!("no method {other}")),
        };

        let response = match outcome {
            Ok(result) => RpcResponse::success(request.id, result),
            Err(message) => RpcResponse::failure(Some(request.id), -32000, message),
        };
        Some(serde_json::to_string(&response).unwrap())
    }
}

impl Transport for MockEngine {
    fn exchange(&mut self, message: &str) -> Result<String, ProtocolError> {
        self.respond(message).ok_or(ProtocolError::Disconnected)
    }
}

fn eval(value: &ValueMessage, assignment: &HashMap<String, i128>) -> Concrete {
    match value {
        ValueMessage::Fresh { id } => Concrete::Int(assignment[id]),
        ValueMessage::Int { literal, .. } => Concrete::Int(*literal),
        ValueMessage::Array { elements, .. } => {
            Concrete::Array(elements.iter().map(|e| eval(e, assignment)).collect())
        }
        ValueMessage::Pointer { allocation } => Concrete::Ptr(Some(allocation.clone())),
        ValueMessage::Null => Concrete::Ptr(None),
    }
}

fn zero(ty: &TypeDescriptor) -> Concrete {
    match ty {
        TypeDescriptor::Array { length, element } => Concrete::Array(vec![zero(element); *length as usize]),
        TypeDescriptor::Pointer => Concrete::Ptr(None),
        TypeDescriptor::Integer { .. } | TypeDescriptor::Void => Concrete::Int(0),
    }
}

/// Run once with `assignment`; `Some(reason)` when a postcondition fails
fn run_once(
    function: NativeFn,
    contract: &ContractMessage,
    assignment: &HashMap<String, i128>,
) -> Option<String> {
    let mut heap = Heap::new();
    for stmt in &contract.setup {
        if let SetupMessage::Allocate { id, ty, points_to, .. } = stmt {
            let initial = match points_to {
                Some(value) => eval(value, assignment),
                None => zero(ty),
            };
            heap.insert(id.clone(), initial);
        }
    }

    let args: Vec<Concrete> = contract
        .execution
        .args
        .iter()
        .map(|arg| match arg {
            ArgumentMessage::Allocation(id) => Concrete::Ptr(Some(id.clone())),
            ArgumentMessage::Value(value) => eval(value, assignment),
        })
        .collect();

    let ret = function(&mut heap, &args);

    for post in &contract.postconditions {
        match post {
            PostconditionMessage::PointsTo { target, value, .. } => {
                let region = &heap[&target.allocation];
                let actual = match (target.index, region) {
                    (Some(i), Concrete::Array(items)) => &items[i],
                    (Some(_), _) => return Some("index into scalar".to_string()),
                    (None, region) => region,
                };
                let expected = eval(value, assignment);
                if *actual != expected {
                    return Some(format!(
                        "{}{} holds {:?}, expected {:?}",
                        target.allocation,
                        target.index.map(|i| format!("[{i}]")).unwrap_or_default(),
                        actual,
                        expected
                    ));
                }
            }
            PostconditionMessage::Returns { value } => {
                let expected = value.as_ref().map(|v| eval(v, assignment));
                if ret != expected {
                    return Some(format!("returned {ret:?}, expected {expected:?}"));
                }
            }
        }
    }
    None
}

// ============================================
// Contracts
// ============================================

pub struct ArraySwapContract;

impl Specification for ArraySwapContract {
    fn specification(&self, c: &mut ContractBuilder) -> Result<(), ContractError> {
        let pair = TypeDescriptor::array(2, TypeDescriptor::i32());
        let a0 = c.fresh_var(TypeDescriptor::i32(), "a0")?;
        let a1 = c.fresh_var(TypeDescriptor::i32(), "a1")?;
        let a = c.alloc(
            pair.clone(),
            Some(SymbolicValue::array(pair, vec![a0.clone(), a1.clone()])?),
        )?;

        c.execute_func([&a])?;

        c.points_to(a.at(0), a1)?;
        c.points_to(a.at(1), a0)?;
        c.returns(Return::Void)
    }
}

pub struct StoreContract;

impl Specification for StoreContract {
    fn specification(&self, c: &mut ContractBuilder) -> Result<(), ContractError> {
        let x = c.fresh_var(TypeDescriptor::i32(), "x")?;
        let p = c.alloc(TypeDescriptor::i32(), None)?;

        c.execute_func([heapspec::Argument::from(&p), heapspec::Argument::from(&x)])?;

        c.points_to(&p, x)?;
        c.returns(Return::Void)
    }
}

pub fn mock_session() -> Session {
    Session::open(Box::new(MockEngine::default()), true).unwrap()
}

// ============================================
// HTTP front end
// ============================================

/// Serve `engine` over HTTP on an ephemeral local port; returns the URL
pub fn serve_http(engine: MockEngine) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let engine = Arc::new(Mutex::new(engine));
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || serve_connection(stream, &engine));
        }
    });
    url
}

fn serve_connection(stream: TcpStream, engine: &Mutex<MockEngine>) {
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    while let Some(body) = read_http_request(&mut reader) {
        let Some(reply) = engine.lock().unwrap().respond(&body) else {
            return;
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            reply.len(),
            reply
        );
        if writer.write_all(response.as_bytes()).is_err() {
            return;
        }
    }
}

/// Body of the next request on the connection, `None` at EOF
pub fn read_http_request(reader: &mut BufReader<TcpStream>) -> Option<String> {
    let mut length = 0;
    let mut saw_request_line = false;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            return None;
        }
        let line = line.trim_end();
        if line.is_empty() {
            if saw_request_line {
                break;
            }
            continue;
        }
        saw_request_line = true;
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                length = value.trim().parse().ok()?;
            }
        }
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).ok()?;
    String::from_utf8(body).ok()
}

/// A local URL nothing listens on
pub fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/")
}
