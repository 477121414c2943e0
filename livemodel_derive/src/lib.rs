use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, Type, parse_macro_input, spanned::Spanned};

/// Derive `livemodel::ObjectModel` for a struct with named fields.
///
/// Container attribute: `#[object(name = "...")]` overrides the type name.
///
/// Field attributes, inside `#[property(...)]`:
/// - `ignore`: declared but never persisted
/// - `index`: equality index on the column
/// - `required`: force a non-optional property
/// - `default`: the field has a default, so it is never required
/// - `linking_objects(property = "...", type = "...")`: on a
///   `LinkingObjects<T>` field, the forward link on `T` it mirrors; `type`
///   defaults to `T`'s type name
#[proc_macro_derive(ObjectModel, attributes(object, property))]
pub fn derive_object_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_object_model(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct ObjectOptions {
    name: Option<String>,
}

struct LinkingOptions {
    source_type: Option<String>,
    property: String,
}

#[derive(Default)]
struct PropertyOptions {
    ignore: bool,
    index: bool,
    required: bool,
    default: bool,
    linking: Option<LinkingOptions>,
}

enum ListElement {
    Scalar(TokenStream2),
    Object(Type),
}

enum FieldKind {
    Scalar { property_type: TokenStream2, optional: bool },
    /// `Option<T>` over a numeric or boolean type
    ErasedOptional { property_type: TokenStream2 },
    Link { target: Type },
    OptionalLink { target: Type },
    List { element: ListElement },
    LinkingObjects { target: Type },
    Opaque,
}

fn expand_object_model(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "ObjectModel does not support generic structs",
        ));
    }

    let object_options = parse_object_options(&input.attrs)?;
    let type_name = object_options
        .name
        .unwrap_or_else(|| struct_name.to_string());

    let data_struct = match input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "ObjectModel can only be derived for structs",
            ));
        }
    };

    let named_fields = match data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "ObjectModel requires named fields",
            ));
        }
    };

    let mut declarations = Vec::<TokenStream2>::new();
    let mut resolver_calls = Vec::<TokenStream2>::new();
    let mut value_inserts = Vec::<TokenStream2>::new();

    for (index, field) in named_fields.named.iter().enumerate() {
        let ident: &Ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new(field.span(), "ObjectModel requires named fields"))?;
        let name = ident.to_string().trim_start_matches("r#").to_string();
        let options = parse_property_options(&field.attrs)?;

        if options.ignore {
            if options.index || options.required || options.linking.is_some() {
                return Err(syn::Error::new(
                    field.span(),
                    "#[property(ignore)] cannot be combined with other property options",
                ));
            }
            declarations.push(quote!(::livemodel::DeclaredProperty::opaque(#name)));
            resolver_calls.push(quote!(.ignore(#name)));
            continue;
        }

        let kind = classify(&field.ty);
        let mut declaration = match &kind {
            FieldKind::Scalar {
                property_type,
                optional: false,
            } => quote!(::livemodel::DeclaredProperty::scalar(#name, #property_type)),
            FieldKind::Scalar {
                property_type,
                optional: true,
            } => quote!(::livemodel::DeclaredProperty::optional(#name, #property_type)),
            FieldKind::ErasedOptional { property_type } => {
                resolver_calls.push(quote! {
                    .generic(::livemodel::GenericPropertyMetadata::optional(#name, #property_type, #index))
                });
                quote!(::livemodel::DeclaredProperty::erased(#name))
            }
            FieldKind::Link { target } => quote! {
                ::livemodel::DeclaredProperty::object(
                    #name,
                    <#target as ::livemodel::ObjectModel>::TYPE_NAME,
                )
            },
            FieldKind::OptionalLink { target } => {
                resolver_calls.push(quote! {
                    .generic(::livemodel::GenericPropertyMetadata::nil_literal_optional(#name, #index))
                });
                quote! {
                    ::livemodel::DeclaredProperty::probed(
                        #name,
                        ::livemodel::TypeProbe::object(<#target as ::livemodel::ObjectModel>::TYPE_NAME),
                    )
                }
            }
            FieldKind::List {
                element: ListElement::Scalar(property_type),
            } => {
                resolver_calls.push(quote! {
                    .generic(::livemodel::GenericPropertyMetadata::list(#name, #property_type, #index))
                });
                quote!(::livemodel::DeclaredProperty::erased(#name))
            }
            FieldKind::List {
                element: ListElement::Object(target),
            } => {
                resolver_calls.push(quote! {
                    .generic(::livemodel::GenericPropertyMetadata::object_list(
                        #name,
                        <#target as ::livemodel::ObjectModel>::TYPE_NAME,
                        #index,
                    ))
                });
                quote!(::livemodel::DeclaredProperty::erased(#name))
            }
            FieldKind::LinkingObjects { target } => {
                let linking = options.linking.as_ref().ok_or_else(|| {
                    syn::Error::new(
                        field.span(),
                        "LinkingObjects fields need #[property(linking_objects(property = \"...\"))]",
                    )
                })?;
                let linked_property = &linking.property;
                let source_type = match &linking.source_type {
                    Some(source_type) => quote!(#source_type),
                    None => quote!(<#target as ::livemodel::ObjectModel>::TYPE_NAME),
                };
                resolver_calls.push(quote! {
                    .generic(::livemodel::GenericPropertyMetadata::linking_objects(
                        #name,
                        #source_type,
                        #linked_property,
                        #index,
                    ))
                });
                quote!(::livemodel::DeclaredProperty::erased(#name))
            }
            FieldKind::Opaque => {
                return Err(syn::Error::new(
                    field.ty.span(),
                    "unsupported property type; mark the field #[property(ignore)]",
                ));
            }
        };

        if options.linking.is_some() && !matches!(kind, FieldKind::LinkingObjects { .. }) {
            return Err(syn::Error::new(
                field.span(),
                "linking_objects(...) is only valid on LinkingObjects<T> fields",
            ));
        }
        if options.default {
            declaration = quote!(#declaration.with_default());
        }
        if options.index {
            resolver_calls.push(quote!(.index(#name)));
        }
        if options.required {
            resolver_calls.push(quote!(.require(#name)));
        }

        declarations.push(declaration);
        if !matches!(kind, FieldKind::LinkingObjects { .. }) {
            value_inserts.push(quote! {
                values.insert(#name.to_string(), ::livemodel::Value::from(self.#ident));
            });
        }
    }

    Ok(quote! {
        impl ::livemodel::ObjectModel for #struct_name {
            const TYPE_NAME: &'static str = #type_name;

            fn declaration() -> ::livemodel::TypeDeclaration {
                ::livemodel::TypeDeclaration::new(#type_name)
                    #(.property(#declarations))*
            }

            fn property_resolver() -> ::std::option::Option<
                ::std::sync::Arc<dyn ::livemodel::GenericPropertyResolver>,
            > {
                ::std::option::Option::Some(::std::sync::Arc::new(
                    ::livemodel::StaticPropertyResolver::new() #(#resolver_calls)*,
                ))
            }

            fn into_values(
                self,
            ) -> ::std::collections::BTreeMap<::std::string::String, ::livemodel::Value> {
                let mut values = ::std::collections::BTreeMap::new();
                #(#value_inserts)*
                values
            }
        }
    })
}

fn classify(ty: &Type) -> FieldKind {
    if let Some(property_type) = scalar_type_tokens(ty) {
        return FieldKind::Scalar {
            property_type,
            optional: false,
        };
    }

    let Some(segment) = last_segment(ty) else {
        return FieldKind::Opaque;
    };
    let Some(inner) = first_generic_type(segment) else {
        return FieldKind::Opaque;
    };

    match segment.ident.to_string().as_str() {
        "Option" => {
            if let Some(target) = link_target(&inner) {
                return FieldKind::OptionalLink { target };
            }
            match (scalar_type_tokens(&inner), is_reflectable_optional(&inner)) {
                (Some(property_type), true) => FieldKind::Scalar {
                    property_type,
                    optional: true,
                },
                (Some(property_type), false) => FieldKind::ErasedOptional { property_type },
                (None, _) => FieldKind::Opaque,
            }
        }
        "Link" => FieldKind::Link { target: inner },
        "List" => {
            if let Some(target) = link_target(&inner) {
                return FieldKind::List {
                    element: ListElement::Object(target),
                };
            }
            match scalar_type_tokens(&inner) {
                Some(property_type) => FieldKind::List {
                    element: ListElement::Scalar(property_type),
                },
                None => FieldKind::Opaque,
            }
        }
        "LinkingObjects" => FieldKind::LinkingObjects { target: inner },
        _ => FieldKind::Opaque,
    }
}

/// Storage type of a plain field, if it has one.
fn scalar_type_tokens(ty: &Type) -> Option<TokenStream2> {
    let segment = last_segment(ty)?;
    let property_type = match segment.ident.to_string().as_str() {
        "bool" => quote!(Boolean),
        "String" => quote!(Text),
        "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" => quote!(Integer),
        "f32" | "f64" => quote!(Float),
        "DateTime" => quote!(Timestamp),
        "Uuid" => quote!(Uuid),
        "Vec" => {
            let element = first_generic_type(segment)?;
            if last_segment(&element)?.ident != "u8" {
                return None;
            }
            quote!(Data)
        }
        _ => return None,
    };
    Some(quote!(::livemodel::PropertyType::#property_type))
}

/// Optionals over heap types are visible to reflection; numeric and boolean
/// optionals are not.
fn is_reflectable_optional(ty: &Type) -> bool {
    last_segment(ty).is_some_and(|segment| {
        matches!(
            segment.ident.to_string().as_str(),
            "String" | "DateTime" | "Uuid" | "Vec"
        )
    })
}

fn link_target(ty: &Type) -> Option<Type> {
    let segment = last_segment(ty)?;
    if segment.ident != "Link" {
        return None;
    }
    first_generic_type(segment)
}

fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
    match ty {
        Type::Path(path) if path.qself.is_none() => path.path.segments.last(),
        _ => None,
    }
}

fn first_generic_type(segment: &syn::PathSegment) -> Option<Type> {
    let syn::PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        return None;
    };

    for arg in &arguments.args {
        if let syn::GenericArgument::Type(ty) = arg {
            return Some(ty.clone());
        }
    }
    None
}

fn parse_object_options(attrs: &[syn::Attribute]) -> syn::Result<ObjectOptions> {
    let mut options = ObjectOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("object") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                options.name = Some(lit.value());
                return Ok(());
            }

            Err(meta.error("Unsupported object attribute. Supported: name = \"...\""))
        })?;
    }

    Ok(options)
}

fn parse_property_options(attrs: &[syn::Attribute]) -> syn::Result<PropertyOptions> {
    let mut options = PropertyOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("property") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("ignore") {
                options.ignore = true;
                return Ok(());
            }

            if meta.path.is_ident("index") {
                options.index = true;
                return Ok(());
            }

            if meta.path.is_ident("required") {
                options.required = true;
                return Ok(());
            }

            if meta.path.is_ident("default") {
                options.default = true;
                return Ok(());
            }

            if meta.path.is_ident("linking_objects") {
                let mut source_type = None;
                let mut property = None;
                meta.parse_nested_meta(|nested| {
                    if nested.path.is_ident("property") {
                        let lit: LitStr = nested.value()?.parse()?;
                        property = Some(lit.value());
                        return Ok(());
                    }
                    if nested.path.is_ident("type") {
                        let lit: LitStr = nested.value()?.parse()?;
                        source_type = Some(lit.value());
                        return Ok(());
                    }
                    Err(nested.error(
                        "Unsupported linking_objects option. Supported: property = \"...\", type = \"...\"",
                    ))
                })?;
                let property =
                    property.ok_or_else(|| meta.error("linking_objects needs property = \"...\""))?;
                options.linking = Some(LinkingOptions {
                    source_type,
                    property,
                });
                return Ok(());
            }

            Err(meta.error(
                "Unsupported property attribute. Supported: ignore, index, required, default, linking_objects(...)",
            ))
        })?;
    }

    Ok(options)
}
