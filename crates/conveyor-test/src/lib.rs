#[macro_export]
macro_rules! ep {
    [$addr:expr] => { conveyor_base::EndPoint::from($addr) };
}

#[macro_export]
macro_rules! slot {
    [$n:expr] => { conveyor_base::SlotId::from($n as u32) };
}

/// `element!(n)` is the test element built from `Test<n>.toml`, with a driver when `n` is even and
/// `n` code files. Extra `field: value` pairs override the defaults.
#[macro_export]
macro_rules! element {
    ($n:expr $(, $field:ident: $value:expr)* $(,)?) => {{
        let n: u32 = $n;
        #[allow(unused_mut)]
        let mut element = conveyor_base::TestElement {
            test_name: format!("Test{n}"),
            build_tool: "sh".to_owned(),
            build_config: format!("Test{n}.toml"),
            test_driver: (n % 2 == 0).then(|| format!("Test{n}_Driver.rs")),
            test_codes: (0..n).map(|i| format!("Test{n}_Code{i}.rs")).collect(),
        };
        $(element.$field = $value.into();)*
        element
    }};
}

/// `job!(author, [elements...])`, or `job!([elements...])` with author `ana`.
#[macro_export]
macro_rules! job {
    ($author:expr, [$($element:expr),* $(,)?]) => {
        conveyor_base::JobDescriptor {
            author: ($author).to_owned(),
            tests: vec![$($element),*],
        }
    };
    ([$($element:expr),* $(,)?]) => {
        $crate::job!("ana", [$($element),*])
    };
}

/// `envelope!(Kind, Command, to => from)`, optionally followed by `argument: ...` and
/// `arguments: [...]`.
#[macro_export]
macro_rules! envelope {
    (
        $kind:ident, $command:ident, $to:expr => $from:expr
        $(, argument: $argument:expr)?
        $(, arguments: [$($arguments:expr),* $(,)?])?
        $(,)?
    ) => {{
        #[allow(unused_mut)]
        let mut envelope = conveyor_base::Envelope::new(
            conveyor_base::MessageKind::$kind,
            conveyor_base::Command::$command,
        )
        .addressed($to, $from);
        $(envelope.argument = ($argument).into();)?
        $(envelope.arguments = vec![$(($arguments).into()),*];)?
        envelope
    }};
}
