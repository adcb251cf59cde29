use proc_macro::TokenStream;
use quote::quote_spanned;
use syn::{ItemFn, LitInt, parse_macro_input, spanned::Spanned};

/// Runs the test body the given number of times.
///
/// Each trial runs inside a `trial` tracing span carrying its index, so a
/// failing trial can be told apart in the logs.
#[proc_macro_attribute]
pub fn repeat(attr: TokenStream, item: TokenStream) -> TokenStream {
    let count = parse_macro_input!(attr as LitInt);
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            for __trial in 0..#count {
                let _span = ::grading::__private::tracing::debug_span!("trial", n = __trial).entered();
                (|| #block)();
            }
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}

/// Fails the test if its body does not finish within the given number of
/// milliseconds.
///
/// The body runs on a watchdog thread. On timeout the thread is abandoned,
/// since a busy-waiting body cannot be interrupted.
#[proc_macro_attribute]
pub fn deadline(attr: TokenStream, item: TokenStream) -> TokenStream {
    let millis = parse_macro_input!(attr as LitInt);
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            let (__tx, __rx) = ::std::sync::mpsc::channel::<()>();
            let __worker = ::std::thread::Builder::new()
                .name("deadline".into())
                .spawn(move || {
                    let __ret = (move || #block)();
                    let _ = __tx.send(());
                    __ret
                })
                .expect("failed to spawn deadline worker");
            match __rx.recv_timeout(::std::time::Duration::from_millis(#millis)) {
                Err(::std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("deadline of {} ms exceeded", #millis)
                }
                _ => match __worker.join() {
                    Ok(__ret) => __ret,
                    Err(__payload) => ::std::panic::resume_unwind(__payload),
                },
            }
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}
